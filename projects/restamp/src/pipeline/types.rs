use crate::ivf::FrameRate;
use crate::recognition::Recognition;
use serde::Serialize;
use std::path::PathBuf;

/// Clock recognition outcome for one frame. `clock_ms` is `None` when the
/// overlay could not be read with enough confidence.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionResult {
    pub timestamp: u64,
    pub clock_ms: Option<u64>,
    pub confidence: f32,
}

impl RecognitionResult {
    pub fn unrecognized(timestamp: u64) -> Self {
        Self {
            timestamp,
            clock_ms: None,
            confidence: 0.0,
        }
    }

    /// Accepts the recognized text as a millisecond clock if it is confident
    /// enough and parses to a positive integer.
    pub fn from_recognition(timestamp: u64, recognition: &Recognition, min_confidence: f32) -> Self {
        let digits: String = recognition
            .text
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        let clock_ms = if recognition.confidence < min_confidence {
            None
        } else {
            digits.parse::<u64>().ok().filter(|ms| *ms > 0)
        };

        Self {
            timestamp,
            clock_ms,
            confidence: recognition.confidence,
        }
    }

    /// Recognized clock expressed in container timestamp units.
    pub fn recognized_timestamp(&self, frame_rate: FrameRate) -> Option<u64> {
        self.clock_ms
            .map(|ms| (frame_rate.as_f64() * ms as f64 / 1000.0).round() as u64)
    }
}

/// A repaired container written to disk.
#[derive(Debug, Clone, Serialize)]
pub struct RepairedStream {
    pub output_path: PathBuf,
    pub participant: String,
    pub start_timestamp: u64,
    pub frames_written: u64,
    pub duplicated_frames: u64,
    pub width: u16,
    pub height: u16,
    #[serde(skip)]
    pub frame_rate: FrameRate,
}

impl RepairedStream {
    /// Output file name without extension, used to key reports.
    pub fn base_name(&self) -> String {
        self.output_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string()
    }
}
