// Repair writer: rewrites a container so its timestamps are contiguous,
// duplicating the previous frame across every gap.

use super::{patch_timestamp, read_frame_from, FrameRate, StreamInfo, FRAME_COUNT_OFFSET};
use crate::error::{RestampError, Result};
use std::io::SeekFrom;
use std::path::Path;
use tokio::io::{AsyncSeekExt, AsyncWriteExt, BufWriter};

/// Largest gap (in frames) that may be filled: one hour at the stream rate.
pub fn max_gap_frames(frame_rate: FrameRate) -> f64 {
    60.0 * 60.0 * frame_rate.as_f64()
}

pub fn check_gap(previous: u64, next: u64, frame_rate: FrameRate) -> Result<u64> {
    let gap = next - previous - 1;
    let limit = max_gap_frames(frame_rate);
    if gap as f64 > limit {
        return Err(RestampError::GapTooLarge {
            previous,
            next,
            gap,
            limit: limit as u64,
        });
    }
    Ok(gap)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteSummary {
    pub frames_written: u64,
    pub duplicated_frames: u64,
}

/// Writes `info`'s frames, read from `source`, to `output` in timestamp order.
///
/// Every frame gets its embedded timestamp set to its catalogue key, gaps are
/// filled with copies of the frame before them, and the header frame count is
/// set to the number of frames actually written.
///
/// Frames go to a `.part` file next to `output` that replaces it only once
/// the whole stream is written. On failure the partial file is removed and an
/// existing `output` is left as it was.
pub async fn write_repaired(source: &Path, info: &StreamInfo, output: &Path) -> Result<WriteSummary> {
    let dir = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let (file, part_path) = tempfile::Builder::new()
        .prefix(".restamp-")
        .suffix(".part")
        .tempfile_in(dir)?
        .into_parts();

    let summary = write_frames(source, info, tokio::fs::File::from_std(file)).await?;
    part_path
        .persist(output)
        .map_err(|e| RestampError::Io(e.error))?;

    Ok(summary)
}

async fn write_frames(
    source: &Path,
    info: &StreamInfo,
    file: tokio::fs::File,
) -> Result<WriteSummary> {
    let mut input = tokio::fs::File::open(source).await?;
    let mut out = BufWriter::new(file);

    let mut header = info.header.raw;
    header[FRAME_COUNT_OFFSET..FRAME_COUNT_OFFSET + 4].copy_from_slice(&[0u8; 4]);
    out.write_all(&header).await?;

    let frame_rate = info.frame_rate();
    let mut summary = WriteSummary {
        frames_written: 0,
        duplicated_frames: 0,
    };
    let mut previous: Option<(u64, Vec<u8>)> = None;

    for (pts, record) in info.catalogue.iter() {
        if let Some((previous_pts, previous_frame)) = &previous {
            let gap = check_gap(*previous_pts, pts, frame_rate)?;
            if gap > 0 {
                tracing::debug!(
                    "{:?}: filling {} missing frames after {}",
                    source,
                    gap,
                    previous_pts
                );
                let mut duplicate = previous_frame.clone();
                for missing in previous_pts + 1..pts {
                    patch_timestamp(&mut duplicate, missing);
                    out.write_all(&duplicate).await?;
                }
                summary.frames_written += gap;
                summary.duplicated_frames += gap;
            }
        }

        let mut frame = read_frame_from(&mut input, record).await?;
        patch_timestamp(&mut frame, pts);
        out.write_all(&frame).await?;
        summary.frames_written += 1;

        previous = Some((pts, frame));
    }

    let frame_count = u32::try_from(summary.frames_written).map_err(|_| {
        RestampError::FrameCountOverflow {
            count: summary.frames_written,
        }
    })?;

    out.flush().await?;
    let mut file = out.into_inner();
    file.seek(SeekFrom::Start(FRAME_COUNT_OFFSET as u64)).await?;
    file.write_all(&frame_count.to_le_bytes()).await?;
    file.flush().await?;

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ivf::reader::parse;
    use crate::ivf::testing::container_bytes;
    use crate::ivf::{embedded_timestamp, read_frame, FRAME_HEADER_LEN, FRAME_PTS_OFFSET};

    async fn frames_of(path: &Path) -> Vec<Vec<u8>> {
        let info = parse(path).await.unwrap();
        let mut frames = Vec::new();
        for (_, record) in info.catalogue.iter() {
            frames.push(read_frame(path, record).await.unwrap());
        }
        frames
    }

    #[tokio::test]
    async fn test_fills_single_gap_with_previous_frame() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.ivf");
        let output = dir.path().join("repaired.ivf");
        std::fs::write(
            &source,
            container_bytes(&[(0, "zero"), (1, "one!"), (3, "three"), (4, "four")]),
        )
        .unwrap();

        let info = parse(&source).await.unwrap();
        let summary = write_repaired(&source, &info, &output).await.unwrap();
        assert_eq!(summary.frames_written, 5);
        assert_eq!(summary.duplicated_frames, 1);

        let repaired = parse(&output).await.unwrap();
        assert_eq!(repaired.ordered_timestamps(), vec![0, 1, 2, 3, 4]);
        assert_eq!(repaired.header.frame_count, 5);
        assert_eq!(repaired.catalogue.len() as u32, repaired.header.frame_count);

        let frames = frames_of(&output).await;
        let (one, two) = (&frames[1], &frames[2]);
        assert_eq!(embedded_timestamp(two), 2);
        assert_eq!(one[..FRAME_PTS_OFFSET], two[..FRAME_PTS_OFFSET]);
        assert_eq!(one[FRAME_HEADER_LEN..], two[FRAME_HEADER_LEN..]);
        assert_eq!(&two[FRAME_HEADER_LEN..], b"one!");
    }

    #[tokio::test]
    async fn test_output_is_contiguous_and_keeps_header() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.ivf");
        let output = dir.path().join("repaired.ivf");
        std::fs::write(
            &source,
            container_bytes(&[(10, "a"), (14, "b"), (15, "c"), (19, "d")]),
        )
        .unwrap();

        let info = parse(&source).await.unwrap();
        let summary = write_repaired(&source, &info, &output).await.unwrap();
        assert_eq!(summary.frames_written, 10);
        assert_eq!(summary.duplicated_frames, 6);

        let frames = frames_of(&output).await;
        let timestamps: Vec<u64> = frames.iter().map(|f| embedded_timestamp(f)).collect();
        assert!(timestamps.windows(2).all(|w| w[1] == w[0] + 1));
        assert_eq!(timestamps.first(), Some(&10));

        let source_bytes = std::fs::read(&source).unwrap();
        let output_bytes = std::fs::read(&output).unwrap();
        assert_eq!(source_bytes[..FRAME_COUNT_OFFSET], output_bytes[..FRAME_COUNT_OFFSET]);
        assert_eq!(source_bytes[28..32], output_bytes[28..32]);
    }

    #[test]
    fn test_gap_limit_boundary() {
        let rate = FrameRate { num: 30, den: 1 };
        let limit = 60 * 60 * 30;
        assert_eq!(check_gap(0, limit + 1, rate).unwrap(), limit);
        assert!(matches!(
            check_gap(0, limit + 2, rate),
            Err(RestampError::GapTooLarge { gap, .. }) if gap == limit + 1
        ));
        assert_eq!(check_gap(5, 6, rate).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_gap_too_large_fails_repair() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.ivf");
        let output = dir.path().join("repaired.ivf");
        let far = 60 * 60 * 30 + 2;
        std::fs::write(&source, container_bytes(&[(0, "a"), (far, "b")])).unwrap();

        let info = parse(&source).await.unwrap();
        let result = write_repaired(&source, &info, &output).await;
        assert!(matches!(result, Err(RestampError::GapTooLarge { .. })));
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_failed_repair_keeps_existing_output() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.ivf");
        let bad = dir.path().join("bad.ivf");
        let output_dir = dir.path().join("restamped");
        std::fs::create_dir_all(&output_dir).unwrap();
        let output = output_dir.join("Alice.ivf");
        std::fs::write(&good, container_bytes(&[(0, "a"), (1, "b"), (2, "c")])).unwrap();
        std::fs::write(&bad, container_bytes(&[(0, "a"), (60 * 60 * 30 + 2, "b")])).unwrap();

        let info = parse(&good).await.unwrap();
        write_repaired(&good, &info, &output).await.unwrap();
        let written = std::fs::read(&output).unwrap();

        let info = parse(&bad).await.unwrap();
        let result = write_repaired(&bad, &info, &output).await;
        assert!(matches!(result, Err(RestampError::GapTooLarge { .. })));

        // The earlier output is intact and no partial file is left behind.
        assert_eq!(std::fs::read(&output).unwrap(), written);
        let entries: Vec<_> = std::fs::read_dir(&output_dir).unwrap().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(parse(&output).await.unwrap().header.frame_count, 3);
    }
}
