// Text recognition over regions of encoded frames.
//
// The OCR engine itself lives outside this crate; `Recognizer` is the seam.

pub mod tesseract;

use anyhow::Result;
use std::future::Future;

/// Pixel rectangle inside a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    /// Top-left band holding the clock overlay.
    pub fn clock_overlay(frame_width: u16, frame_height: u16) -> Self {
        Self {
            x: 0,
            y: 0,
            width: (frame_width as u32).min(320),
            height: (frame_height as u32).min(64),
        }
    }

    /// Full-width band at the bottom of the frame holding the participant label.
    pub fn name_label(frame_width: u16, frame_height: u16) -> Self {
        let height = (frame_height as u32).min(64);
        Self {
            x: 0,
            y: frame_height as u32 - height,
            width: frame_width as u32,
            height,
        }
    }
}

/// Characters the engine is allowed to produce for a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharacterSet {
    Digits,
    Label,
}

impl CharacterSet {
    pub fn whitelist(&self) -> &'static str {
        match self {
            CharacterSet::Digits => "0123456789",
            CharacterSet::Label => {
                "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_"
            }
        }
    }
}

/// Engine output; `confidence` is on a 0-100 scale.
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub text: String,
    pub confidence: f32,
}

/// An opaque encoded frame plus what is needed to decode it standalone.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub payload: Vec<u8>,
    pub width: u16,
    pub height: u16,
    pub fourcc: [u8; 4],
}

pub trait Recognizer: Send + Sync + 'static {
    fn recognize(
        &self,
        frame: &EncodedFrame,
        region: Region,
        charset: CharacterSet,
    ) -> impl Future<Output = Result<Recognition>> + Send;
}
