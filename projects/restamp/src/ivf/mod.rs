// IVF container: header layout, frame catalogue and raw frame access.

pub mod reader;
pub mod writer;

use crate::error::RestampError;
use std::collections::BTreeMap;
use std::io::SeekFrom;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

pub const HEADER_LEN: usize = 32;
pub const FRAME_HEADER_LEN: usize = 12;
pub const SIGNATURE: &[u8; 4] = b"DKIF";

const WIDTH_OFFSET: usize = 12;
const HEIGHT_OFFSET: usize = 14;
const RATE_NUM_OFFSET: usize = 16;
const RATE_DEN_OFFSET: usize = 20;
pub const FRAME_COUNT_OFFSET: usize = 24;

/// Offset of the 8-byte timestamp inside a frame record.
pub const FRAME_PTS_OFFSET: usize = 4;

/// Frames per second as stored in the header (`num / den`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRate {
    pub num: u32,
    pub den: u32,
}

impl FrameRate {
    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }
}

/// Decoded view of the fixed 32-byte file header. `raw` is kept verbatim so
/// the writer can reproduce everything it does not touch.
#[derive(Debug, Clone)]
pub struct IvfHeader {
    pub raw: [u8; HEADER_LEN],
    pub width: u16,
    pub height: u16,
    pub frame_rate: FrameRate,
    pub frame_count: u32,
}

impl IvfHeader {
    pub fn decode(path: &Path, raw: [u8; HEADER_LEN]) -> Result<Self, RestampError> {
        if &raw[0..4] != SIGNATURE {
            tracing::warn!("{:?}: unexpected container signature {:?}", path, &raw[0..4]);
        }

        let frame_rate = FrameRate {
            num: read_u32(&raw, RATE_NUM_OFFSET),
            den: read_u32(&raw, RATE_DEN_OFFSET),
        };
        if frame_rate.num == 0 || frame_rate.den == 0 {
            return Err(RestampError::MalformedContainer {
                path: path.to_path_buf(),
                reason: format!("invalid frame rate {}/{}", frame_rate.num, frame_rate.den),
            });
        }

        Ok(Self {
            raw,
            width: read_u16(&raw, WIDTH_OFFSET),
            height: read_u16(&raw, HEIGHT_OFFSET),
            frame_rate,
            frame_count: read_u32(&raw, FRAME_COUNT_OFFSET),
        })
    }

    /// Four-character codec code, e.g. `VP80`.
    pub fn fourcc(&self) -> [u8; 4] {
        [self.raw[8], self.raw[9], self.raw[10], self.raw[11]]
    }
}

fn read_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(bytes)
}

/// One physical frame in the container. `byte_length` includes the 12-byte
/// frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRecord {
    pub sequence_index: usize,
    pub byte_offset: u64,
    pub byte_length: u64,
}

/// Presentation timestamp -> frame. Keys are unique; the first frame to claim
/// a timestamp keeps it.
#[derive(Debug, Clone, Default)]
pub struct Catalogue {
    frames: BTreeMap<u64, FrameRecord>,
}

impl Catalogue {
    /// Inserts `record` under `pts` unless the key is taken. Returns whether
    /// the record was stored.
    pub fn insert(&mut self, pts: u64, record: FrameRecord) -> bool {
        if self.frames.contains_key(&pts) {
            tracing::warn!(
                "{}",
                RestampError::DuplicateTimestamp {
                    pts,
                    sequence_index: record.sequence_index,
                }
            );
            return false;
        }
        self.frames.insert(pts, record);
        true
    }

    pub fn get(&self, pts: u64) -> Option<&FrameRecord> {
        self.frames.get(&pts)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn first_timestamp(&self) -> Option<u64> {
        self.frames.keys().next().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &FrameRecord)> {
        self.frames.iter().map(|(pts, record)| (*pts, record))
    }
}

/// Parsed stream: header fields plus its catalogue. The ordered timestamp
/// list is always derived from the catalogue, never stored.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub header: IvfHeader,
    pub catalogue: Catalogue,
    pub participant: Option<String>,
}

impl StreamInfo {
    pub fn width(&self) -> u16 {
        self.header.width
    }

    pub fn height(&self) -> u16 {
        self.header.height
    }

    pub fn frame_rate(&self) -> FrameRate {
        self.header.frame_rate
    }

    pub fn ordered_timestamps(&self) -> Vec<u64> {
        self.catalogue.iter().map(|(pts, _)| pts).collect()
    }

    /// Same stream with a replacement catalogue.
    pub fn with_catalogue(&self, catalogue: Catalogue, participant: Option<String>) -> Self {
        Self {
            header: self.header.clone(),
            catalogue,
            participant,
        }
    }
}

/// Reads a complete frame record (frame header + payload) from `path`.
pub async fn read_frame(path: &Path, record: &FrameRecord) -> std::io::Result<Vec<u8>> {
    let mut file = tokio::fs::File::open(path).await?;
    read_frame_from(&mut file, record).await
}

pub async fn read_frame_from(
    file: &mut tokio::fs::File,
    record: &FrameRecord,
) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0u8; record.byte_length as usize];
    file.seek(SeekFrom::Start(record.byte_offset)).await?;
    file.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Builds a header the way capture tools write it.
pub fn encode_header(
    fourcc: [u8; 4],
    width: u16,
    height: u16,
    frame_rate: FrameRate,
    frame_count: u32,
) -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[0..4].copy_from_slice(SIGNATURE);
    header[6..8].copy_from_slice(&(HEADER_LEN as u16).to_le_bytes());
    header[8..12].copy_from_slice(&fourcc);
    header[WIDTH_OFFSET..WIDTH_OFFSET + 2].copy_from_slice(&width.to_le_bytes());
    header[HEIGHT_OFFSET..HEIGHT_OFFSET + 2].copy_from_slice(&height.to_le_bytes());
    header[RATE_NUM_OFFSET..RATE_NUM_OFFSET + 4].copy_from_slice(&frame_rate.num.to_le_bytes());
    header[RATE_DEN_OFFSET..RATE_DEN_OFFSET + 4].copy_from_slice(&frame_rate.den.to_le_bytes());
    header[FRAME_COUNT_OFFSET..FRAME_COUNT_OFFSET + 4].copy_from_slice(&frame_count.to_le_bytes());
    header
}

/// Frame record: 4-byte payload size, 8-byte timestamp, payload.
pub fn encode_frame(pts: u64, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&pts.to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Overwrites the embedded timestamp of a frame record in place.
pub fn patch_timestamp(frame: &mut [u8], pts: u64) {
    frame[FRAME_PTS_OFFSET..FRAME_HEADER_LEN].copy_from_slice(&pts.to_le_bytes());
}

/// Timestamp embedded in a frame record.
pub fn embedded_timestamp(frame: &[u8]) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&frame[FRAME_PTS_OFFSET..FRAME_HEADER_LEN]);
    u64::from_le_bytes(bytes)
}
