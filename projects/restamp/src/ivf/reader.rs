// Container reader: indexes every frame of an IVF file by presentation timestamp.

use super::{Catalogue, FrameRecord, IvfHeader, StreamInfo, FRAME_HEADER_LEN, HEADER_LEN};
use crate::error::{RestampError, Result};
use std::io::{ErrorKind, SeekFrom};
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Parses the header and frame index of `path`.
///
/// Payloads are skipped, not read. A short frame header or a payload that runs
/// past end-of-file ends the index without error.
pub async fn parse(path: &Path) -> Result<StreamInfo> {
    let mut file = tokio::fs::File::open(path).await?;
    let file_len = file.metadata().await?.len();

    let mut raw = [0u8; HEADER_LEN];
    if let Err(e) = file.read_exact(&mut raw).await {
        return Err(RestampError::MalformedContainer {
            path: path.to_path_buf(),
            reason: format!("header unreadable: {}", e),
        });
    }
    let header = IvfHeader::decode(path, raw)?;

    let mut catalogue = Catalogue::default();
    let mut sequence_index = 0;
    let mut position = HEADER_LEN as u64;
    let mut frame_header = [0u8; FRAME_HEADER_LEN];

    loop {
        match file.read_exact(&mut frame_header).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }

        let size = u32::from_le_bytes([
            frame_header[0],
            frame_header[1],
            frame_header[2],
            frame_header[3],
        ]) as u64;
        let mut pts_bytes = [0u8; 8];
        pts_bytes.copy_from_slice(&frame_header[4..12]);
        let pts = u64::from_le_bytes(pts_bytes);

        let byte_length = size + FRAME_HEADER_LEN as u64;
        if position + byte_length > file_len {
            tracing::debug!(
                "{:?}: truncated frame at offset {} (needs {} bytes, {} left)",
                path,
                position,
                byte_length,
                file_len - position
            );
            break;
        }

        let record = FrameRecord {
            sequence_index,
            byte_offset: position,
            byte_length,
        };
        if catalogue.insert(pts, record) {
            sequence_index += 1;
        }

        position += byte_length;
        file.seek(SeekFrom::Start(position)).await?;
    }

    tracing::debug!(
        "{:?}: {}x{} @ {}/{} fps, {} frames indexed (header says {})",
        path,
        header.width,
        header.height,
        header.frame_rate.num,
        header.frame_rate.den,
        catalogue.len(),
        header.frame_count
    );

    Ok(StreamInfo {
        header,
        catalogue,
        participant: None,
    })
}
