// Timestamp recovery: reads the clock burned into every frame, reconciles the
// noisy readings into a gap-describable timeline and re-keys the catalogue.
//
// Frames are recognized in chunks of `pool_size`. All tasks of a chunk run at
// once and settle independently; the next chunk starts only after every task
// of the current one has finished. Results are consumed in input order.

use crate::error::RestampError;
use crate::ivf::{read_frame, Catalogue, FrameRecord, StreamInfo, FRAME_HEADER_LEN};
use crate::pipeline::types::RecognitionResult;
use crate::recognition::{CharacterSet, EncodedFrame, Recognition, Recognizer, Region};
use anyhow::Result;
use futures::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const DEFAULT_MIN_CONFIDENCE: f32 = 75.0;

#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Concurrent recognition tasks per chunk.
    pub pool_size: usize,
    /// Minimum engine confidence (0-100) for a reading to count.
    pub min_confidence: f32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            pool_size: num_cpus::get(),
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }
}

/// Geometry shared by every frame of the stream being recovered.
#[derive(Debug, Clone, Copy)]
struct FrameShape {
    width: u16,
    height: u16,
    fourcc: [u8; 4],
}

impl FrameShape {
    fn of(info: &StreamInfo) -> Self {
        Self {
            width: info.width(),
            height: info.height(),
            fourcc: info.header.fourcc(),
        }
    }
}

async fn load_frame(path: &Path, record: &FrameRecord, shape: FrameShape) -> Result<EncodedFrame> {
    let mut bytes = read_frame(path, record).await?;
    let payload = bytes.split_off(FRAME_HEADER_LEN);
    Ok(EncodedFrame {
        payload,
        width: shape.width,
        height: shape.height,
        fourcc: shape.fourcc,
    })
}

/// Recovers clock-based timestamps and the participant name for `info`.
///
/// Never fails: frames that cannot be read or recognized are reconciled
/// against their neighbours or dropped. The returned stream may have an empty
/// catalogue and no participant; the caller decides whether that is fatal.
pub async fn recover<R: Recognizer>(
    path: &Path,
    info: &StreamInfo,
    recognizer: Arc<R>,
    config: &RecoveryConfig,
) -> StreamInfo {
    let timestamps = info.ordered_timestamps();
    let frame_rate = info.frame_rate();
    let shape = FrameShape::of(info);
    let clock_region = Region::clock_overlay(info.width(), info.height());
    let label_region = Region::name_label(info.width(), info.height());
    let pool_size = config.pool_size.max(1);

    let pb = ProgressBar::new(timestamps.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} {msg} [{bar:40.cyan/blue}] {pos}/{len} ({per_sec:.1.yellow}, {eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb.set_message(
        path.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
    );

    let mut results: Vec<RecognitionResult> = Vec::with_capacity(timestamps.len());
    let mut participant: Option<String> = None;

    for chunk in timestamps.chunks(pool_size) {
        let tasks: Vec<_> = chunk
            .iter()
            .map(|&pts| {
                let recognizer = recognizer.clone();
                let path: PathBuf = path.to_path_buf();
                let record = info.catalogue.get(pts).copied();
                tokio::spawn(async move {
                    let record = record.ok_or(RestampError::UnresolvedFrameLookup { pts })?;
                    let frame = load_frame(&path, &record, shape).await?;
                    recognizer
                        .recognize(&frame, clock_region, CharacterSet::Digits)
                        .await
                })
            })
            .collect();

        let outcomes = join_all(tasks).await;

        let first_in_chunk = results.len();
        for (&pts, outcome) in chunk.iter().zip(outcomes) {
            let result = match outcome {
                Ok(Ok(recognition)) => {
                    RecognitionResult::from_recognition(pts, &recognition, config.min_confidence)
                }
                Ok(Err(e)) => {
                    tracing::warn!("{:?}: recognition failed for frame {}: {:#}", path, pts, e);
                    RecognitionResult::unrecognized(pts)
                }
                Err(e) => {
                    tracing::warn!("{:?}: recognition task for frame {} aborted: {}", path, pts, e);
                    RecognitionResult::unrecognized(pts)
                }
            };
            if result.clock_ms.is_none() {
                tracing::debug!(
                    "{:?}: frame {} unrecognized (confidence {:.1})",
                    path,
                    pts,
                    result.confidence
                );
            }
            results.push(result);
        }
        pb.inc(chunk.len() as u64);

        if participant.is_none() {
            participant = identify_participant(
                path,
                info,
                recognizer.as_ref(),
                &results[first_in_chunk..],
                shape,
                label_region,
                config.min_confidence,
            )
            .await;
        }
    }
    pb.finish_and_clear();

    let samples: Vec<(u64, Option<u64>)> = results
        .iter()
        .map(|r| (r.timestamp, r.recognized_timestamp(frame_rate)))
        .collect();
    let resolved = reconcile(&samples);
    let catalogue = rekey(&info.catalogue, &resolved);

    tracing::info!(
        "{:?}: recovered {} of {} frames, participant {:?}",
        path,
        catalogue.len(),
        timestamps.len(),
        participant
    );

    info.with_catalogue(catalogue, participant)
}

/// Reads the name label from the first frame of `results` whose clock was
/// recognized, moving on to the next such frame when the label is unreadable.
async fn identify_participant<R: Recognizer>(
    path: &Path,
    info: &StreamInfo,
    recognizer: &R,
    results: &[RecognitionResult],
    shape: FrameShape,
    region: Region,
    min_confidence: f32,
) -> Option<String> {
    for result in results.iter().filter(|r| r.clock_ms.is_some()) {
        let Some(record) = info.catalogue.get(result.timestamp) else {
            continue;
        };
        let recognition = match load_frame(path, record, shape).await {
            Ok(frame) => recognizer.recognize(&frame, region, CharacterSet::Label).await,
            Err(e) => Err(e),
        };
        match recognition {
            Ok(recognition) => {
                if let Some(name) = accept_label(&recognition, min_confidence) {
                    tracing::info!("{:?}: participant {:?} at frame {}", path, name, result.timestamp);
                    return Some(name);
                }
            }
            Err(e) => {
                tracing::debug!(
                    "{:?}: label recognition failed at frame {}: {:#}",
                    path,
                    result.timestamp,
                    e
                );
            }
        }
    }
    None
}

fn accept_label(recognition: &Recognition, min_confidence: f32) -> Option<String> {
    let text = recognition.text.trim();
    if recognition.confidence > min_confidence && !text.is_empty() {
        Some(text.to_string())
    } else {
        None
    }
}

/// Resolves every (original timestamp, recognized timestamp) pair.
///
/// Walking in original order, an unrecognized entry inherits the previous
/// entry's resolved value advanced by the original timestamp distance. When
/// the previous entry has no resolved value either, there is no previous
/// entry, or the advanced value overflows, the timestamp is dropped.
pub fn reconcile(samples: &[(u64, Option<u64>)]) -> BTreeMap<u64, u64> {
    let mut ordered = samples.to_vec();
    ordered.sort_by_key(|(pts, _)| *pts);

    let mut resolved = BTreeMap::new();
    let mut previous: Option<(u64, Option<u64>)> = None;

    for (pts, recognized) in ordered {
        let value = match (recognized, previous) {
            (Some(value), _) => Some(value),
            (None, Some((previous_pts, Some(previous_value)))) => {
                previous_value.checked_add(pts - previous_pts)
            }
            _ => None,
        };

        match value {
            Some(value) => {
                resolved.insert(pts, value);
            }
            None => tracing::debug!("dropping frame {}: no recognized clock to extend", pts),
        }
        previous = Some((pts, value));
    }

    resolved
}

/// Builds a new catalogue holding each original frame under its resolved key.
pub fn rekey(original: &Catalogue, resolved: &BTreeMap<u64, u64>) -> Catalogue {
    let mut catalogue = Catalogue::default();
    for (&pts, &recovered) in resolved {
        match original.get(pts) {
            Some(record) => {
                catalogue.insert(recovered, *record);
            }
            None => tracing::warn!("{}", RestampError::UnresolvedFrameLookup { pts }),
        }
    }
    catalogue
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ivf::reader::parse;
    use crate::ivf::testing::container_bytes;
    use crate::recognition::testing::ScriptedRecognizer;
    use anyhow::Context;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[test]
    fn test_reconcile_extends_previous_value() {
        let samples = [(10, Some(1000)), (11, None), (12, None), (13, Some(1200))];
        let resolved = reconcile(&samples);
        let values: Vec<(u64, u64)> = resolved.into_iter().collect();
        assert_eq!(values, vec![(10, 1000), (11, 1001), (12, 1002), (13, 1200)]);
    }

    #[test]
    fn test_reconcile_is_identity_when_everything_is_recognized() {
        let samples = [(3, Some(90)), (1, Some(88)), (2, Some(89)), (7, Some(95))];
        let resolved = reconcile(&samples);
        let values: Vec<(u64, u64)> = resolved.into_iter().collect();
        assert_eq!(values, vec![(1, 88), (2, 89), (3, 90), (7, 95)]);
    }

    #[test]
    fn test_reconcile_drops_leading_unrecognized() {
        let samples = [(0, None), (1, None), (2, Some(50)), (3, None)];
        let resolved = reconcile(&samples);
        let values: Vec<(u64, u64)> = resolved.into_iter().collect();
        assert_eq!(values, vec![(2, 50), (3, 51)]);
    }

    #[test]
    fn test_reconcile_drops_overflowing_extension() {
        let samples = [(0, Some(u64::MAX - 1)), (1, None), (3, None), (4, Some(7)), (5, None)];
        let resolved = reconcile(&samples);
        let values: Vec<(u64, u64)> = resolved.into_iter().collect();
        assert_eq!(values, vec![(0, u64::MAX - 1), (1, u64::MAX), (4, 7), (5, 8)]);
    }

    #[test]
    fn test_rekey_keeps_first_frame_on_recovered_collision() {
        let mut original = Catalogue::default();
        for (i, pts) in [5u64, 6, 7].iter().enumerate() {
            original.insert(
                *pts,
                FrameRecord {
                    sequence_index: i,
                    byte_offset: 32 + i as u64 * 20,
                    byte_length: 20,
                },
            );
        }
        let resolved: BTreeMap<u64, u64> = [(5, 100), (6, 100), (7, 101), (9, 102)].into();
        let rekeyed = rekey(&original, &resolved);

        let keys: Vec<u64> = rekeyed.iter().map(|(pts, _)| pts).collect();
        assert_eq!(keys, vec![100, 101]);
        assert_eq!(rekeyed.get(100).unwrap().sequence_index, 0);
        assert_eq!(rekeyed.get(101).unwrap().sequence_index, 2);
    }

    fn config(pool_size: usize) -> RecoveryConfig {
        RecoveryConfig {
            pool_size,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }

    #[tokio::test]
    async fn test_recover_rekeys_by_clock_and_names_participant() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alice-send_1.ivf");
        std::fs::write(
            &path,
            container_bytes(&[
                (0, "1000|Alice"),
                (1, "1033|Alice"),
                (2, "?1066|Alice"),
                (3, "!broken"),
                (4, "1133|Alice"),
            ]),
        )
        .unwrap();

        let info = parse(&path).await.unwrap();
        let recovered = recover(&path, &info, Arc::new(ScriptedRecognizer), &config(2)).await;

        assert_eq!(recovered.participant.as_deref(), Some("Alice"));
        assert_eq!(recovered.ordered_timestamps(), vec![30, 31, 32, 33, 34]);
        // Original frames keep their physical location.
        assert_eq!(recovered.catalogue.get(32), info.catalogue.get(2));
        assert_eq!(recovered.header.raw, info.header.raw);
        // The input stream is left untouched.
        assert_eq!(info.ordered_timestamps(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_recover_retries_name_on_later_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bob-recv_1.ivf");
        std::fs::write(
            &path,
            container_bytes(&[(0, "?1"), (1, "2000"), (2, "2033"), (3, "2066|Carol")]),
        )
        .unwrap();

        let info = parse(&path).await.unwrap();
        let recovered = recover(&path, &info, Arc::new(ScriptedRecognizer), &config(1)).await;

        assert_eq!(recovered.participant.as_deref(), Some("Carol"));
        assert_eq!(recovered.ordered_timestamps(), vec![60, 61, 62]);
    }

    #[tokio::test]
    async fn test_recover_without_any_clock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blank.ivf");
        std::fs::write(&path, container_bytes(&[(0, "?1|Dan"), (1, "!x|Dan")])).unwrap();

        let info = parse(&path).await.unwrap();
        let recovered = recover(&path, &info, Arc::new(ScriptedRecognizer), &config(4)).await;

        assert!(recovered.catalogue.is_empty());
        assert_eq!(recovered.participant, None);
    }

    /// Answers `<index>:<clock>` payloads, sleeping longer for earlier frames
    /// so that tasks of a chunk finish in reverse order.
    struct PacedRecognizer {
        frames: u64,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        finished: AtomicUsize,
        /// (frame index, clock tasks finished when it started)
        starts: Mutex<Vec<(usize, usize)>>,
    }

    impl Recognizer for PacedRecognizer {
        async fn recognize(
            &self,
            frame: &EncodedFrame,
            _region: Region,
            charset: CharacterSet,
        ) -> Result<Recognition> {
            if charset == CharacterSet::Label {
                return Ok(Recognition {
                    text: "Alice".to_string(),
                    confidence: 90.0,
                });
            }

            let script = String::from_utf8_lossy(&frame.payload).to_string();
            let (index, clock) = script.split_once(':').context("unscripted frame")?;
            let index: usize = index.parse()?;

            self.starts
                .lock()
                .unwrap()
                .push((index, self.finished.load(Ordering::SeqCst)));
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            tokio::time::sleep(Duration::from_millis(5 * (self.frames - index as u64))).await;

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(Recognition {
                text: clock.to_string(),
                confidence: 95.0,
            })
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_recover_bounds_concurrency_and_keeps_input_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alice-send_1.ivf");
        let frames = 10u64;
        // Frame i shows the clock of pts 30 + i at 30 fps.
        let scripts: Vec<String> = (0..frames)
            .map(|i| format!("{}:{}", i, ((30 + i) * 1000 + 15) / 30))
            .collect();
        let entries: Vec<(u64, &str)> = scripts
            .iter()
            .enumerate()
            .map(|(i, s)| (i as u64, s.as_str()))
            .collect();
        std::fs::write(&path, container_bytes(&entries)).unwrap();

        let recognizer = Arc::new(PacedRecognizer {
            frames,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
            starts: Mutex::new(Vec::new()),
        });
        let pool_size = 3;
        let info = parse(&path).await.unwrap();
        let recovered = recover(&path, &info, recognizer.clone(), &config(pool_size)).await;

        let peak = recognizer.peak.load(Ordering::SeqCst);
        assert!(peak <= pool_size, "peak {} exceeds pool size", peak);
        assert!(peak > 1);

        // A chunk starts only once every earlier chunk has settled.
        let starts = recognizer.starts.lock().unwrap();
        assert_eq!(starts.len(), frames as usize);
        for &(index, finished) in starts.iter() {
            assert!(finished >= index / pool_size * pool_size);
        }

        assert_eq!(recovered.participant.as_deref(), Some("Alice"));
        assert_eq!(recovered.ordered_timestamps(), (30..40).collect::<Vec<u64>>());
        for i in 0..frames {
            assert_eq!(recovered.catalogue.get(30 + i), info.catalogue.get(i));
        }
    }
}
