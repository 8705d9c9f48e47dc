use crate::error::{RestampError, Result};
use crate::ivf::reader::parse;
use crate::ivf::writer::write_repaired;
use crate::pipeline::recovery::{recover, RecoveryConfig};
use crate::pipeline::roles::{classify_source, output_file_name};
use crate::pipeline::types::RepairedStream;
use crate::recognition::Recognizer;
use std::path::Path;
use std::sync::Arc;

/// Parses `path`, recovers its clock timeline and writes a gap-free copy into
/// `output_dir`, named after the recognized participant and the capture role.
pub async fn repair<R: Recognizer>(
    path: &Path,
    output_dir: &Path,
    recognizer: Arc<R>,
    config: &RecoveryConfig,
) -> Result<RepairedStream> {
    let info = parse(path).await?;
    let recovered = recover(path, &info, recognizer, config).await;

    let participant = recovered
        .participant
        .clone()
        .ok_or_else(|| RestampError::NoParticipantIdentified {
            path: path.to_path_buf(),
        })?;
    let start_timestamp = recovered
        .catalogue
        .first_timestamp()
        .ok_or_else(|| RestampError::NoFramesRecovered {
            path: path.to_path_buf(),
        })?;

    let role = classify_source(path);
    tokio::fs::create_dir_all(output_dir).await?;
    let output_path = output_dir.join(output_file_name(&role, &participant, path));

    let summary = write_repaired(path, &recovered, &output_path).await?;
    tracing::info!(
        "Repaired {:?} -> {:?}: {} frames written, {} duplicated",
        path,
        output_path,
        summary.frames_written,
        summary.duplicated_frames
    );

    Ok(RepairedStream {
        output_path,
        participant,
        start_timestamp,
        frames_written: summary.frames_written,
        duplicated_frames: summary.duplicated_frames,
        width: recovered.width(),
        height: recovered.height(),
        frame_rate: recovered.frame_rate(),
    })
}
