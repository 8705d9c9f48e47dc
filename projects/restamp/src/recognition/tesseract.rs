use super::{CharacterSet, EncodedFrame, Recognition, Recognizer, Region};
use crate::ivf::{encode_frame, encode_header, FrameRate};
use anyhow::{anyhow, Context, Result};
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// OCR through the `tesseract` CLI. Frames are decoded one at a time by the
/// `ffmpeg` CLI, so each frame must be decodable on its own.
#[derive(Debug, Clone)]
pub struct TesseractRecognizer {
    ffmpeg: PathBuf,
    tesseract: PathBuf,
}

impl TesseractRecognizer {
    pub fn new(ffmpeg: impl Into<PathBuf>, tesseract: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            tesseract: tesseract.into(),
        }
    }

    async fn decode_png(&self, frame: &EncodedFrame) -> Result<Vec<u8>> {
        let rate = FrameRate { num: 30, den: 1 };
        let mut container = encode_header(frame.fourcc, frame.width, frame.height, rate, 1).to_vec();
        container.extend(encode_frame(0, &frame.payload));

        run_piped(
            &self.ffmpeg,
            &[
                "-hide_banner",
                "-loglevel",
                "error",
                "-f",
                "ivf",
                "-i",
                "pipe:0",
                "-frames:v",
                "1",
                "-f",
                "image2pipe",
                "-vcodec",
                "png",
                "pipe:1",
            ],
            container,
        )
        .await
        .context("ffmpeg could not decode frame")
    }
}

impl Recognizer for TesseractRecognizer {
    async fn recognize(
        &self,
        frame: &EncodedFrame,
        region: Region,
        charset: CharacterSet,
    ) -> Result<Recognition> {
        let png = self.decode_png(frame).await?;
        let cropped = tokio::task::spawn_blocking(move || crop_to_png(&png, region)).await??;

        let whitelist = format!("tessedit_char_whitelist={}", charset.whitelist());
        let tsv = run_piped(
            &self.tesseract,
            &["stdin", "stdout", "--psm", "7", "-c", &whitelist, "tsv"],
            cropped,
        )
        .await
        .context("tesseract failed")?;

        Ok(parse_tsv(&String::from_utf8_lossy(&tsv)))
    }
}

/// Cuts `region` out of an encoded image and re-encodes it as grayscale PNG.
fn crop_to_png(png: &[u8], region: Region) -> Result<Vec<u8>> {
    let image = image::load_from_memory(png).context("decoded frame is not an image")?;

    let x = region.x.min(image.width());
    let y = region.y.min(image.height());
    let width = region.width.min(image.width() - x);
    let height = region.height.min(image.height() - y);
    if width == 0 || height == 0 {
        return Err(anyhow!(
            "region {:?} lies outside {}x{} frame",
            region,
            image.width(),
            image.height()
        ));
    }

    let gray = DynamicImage::ImageLuma8(image.crop_imm(x, y, width, height).to_luma8());
    let mut out = Vec::new();
    gray.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)?;
    Ok(out)
}

/// Runs `program`, feeding `input` on stdin, and returns stdout.
async fn run_piped(program: &Path, args: &[&str], input: Vec<u8>) -> Result<Vec<u8>> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to spawn {:?}", program))?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| anyhow!("no stdin for {:?}", program))?;
    let feeder = tokio::spawn(async move {
        stdin.write_all(&input).await?;
        stdin.shutdown().await
    });

    let output = child.wait_with_output().await?;
    // A tool that exits early closes its stdin; that shows up as a broken
    // pipe here and is reported through the exit status instead.
    if let Err(e) = feeder.await? {
        tracing::debug!("writing to {:?} stopped early: {}", program, e);
    }

    if !output.status.success() {
        return Err(anyhow!(
            "{:?} exited with {}: {}",
            program,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(output.stdout)
}

/// Folds tesseract TSV rows into one result: word texts joined by spaces and
/// the mean word confidence. Non-word rows and rows with negative confidence
/// are ignored.
pub fn parse_tsv(tsv: &str) -> Recognition {
    let mut words = Vec::new();
    let mut confidence_sum = 0.0f32;

    for line in tsv.lines().skip(1) {
        let columns: Vec<&str> = line.split('\t').collect();
        if columns.len() < 12 || columns[0] != "5" {
            continue;
        }
        let confidence: f32 = match columns[10].trim().parse() {
            Ok(c) if c >= 0.0 => c,
            _ => continue,
        };
        let text = columns[11].trim();
        if text.is_empty() {
            continue;
        }
        words.push(text.to_string());
        confidence_sum += confidence;
    }

    if words.is_empty() {
        return Recognition {
            text: String::new(),
            confidence: 0.0,
        };
    }

    Recognition {
        confidence: confidence_sum / words.len() as f32,
        text: words.join(" "),
    }
}
