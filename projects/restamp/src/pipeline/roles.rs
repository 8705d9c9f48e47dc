// Sender/receiver classification.
//
// Capture files are named `<token>_<anything>.<ext>` where `<token>` ends in
// `send` for the sender's own capture and in `recv` for a capture taken by a
// receiver. All naming conventions are kept in this module.

use std::path::Path;

const SEND_MARKER: &str = "send";
const RECV_MARKER: &str = "recv";
const DEGRADED_INFIX: &str = "_recv-by_";
const DEFAULT_EXTENSION: &str = "ivf";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamRole {
    /// The participant's own outgoing video.
    Reference,
    /// The participant's video as captured by `receiver`.
    Degraded { receiver: String },
}

/// Classifies a capture by the leading token of its file name.
pub fn classify_source(path: &Path) -> StreamRole {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    let token = stem.split('_').next().unwrap_or_default();

    if token.ends_with(SEND_MARKER) {
        return StreamRole::Reference;
    }

    let receiver = token
        .strip_suffix(RECV_MARKER)
        .unwrap_or(token)
        .trim_end_matches(['-', '_', '.']);
    let receiver = if receiver.is_empty() { token } else { receiver };

    StreamRole::Degraded {
        receiver: receiver.to_string(),
    }
}

/// File name of the repaired output for a capture of `participant`.
pub fn output_file_name(role: &StreamRole, participant: &str, source: &Path) -> String {
    let extension = source
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or(DEFAULT_EXTENSION);

    match role {
        StreamRole::Reference => format!("{}.{}", participant, extension),
        StreamRole::Degraded { receiver } => {
            format!("{}{}{}.{}", participant, DEGRADED_INFIX, receiver, extension)
        }
    }
}

/// Whether a repaired output (by file name) holds a degraded stream.
pub fn is_degraded_output(path: &Path) -> bool {
    path.file_name()
        .and_then(|s| s.to_str())
        .map(|name| name.contains(DEGRADED_INFIX))
        .unwrap_or(false)
}
