use anyhow::Result;
use argus_types::detection::{class_label, CLASS_PERSON, CLASS_VEHICLE};
use argus_types::{BoundingBox, DetectionRecord, FrameMeta};
use chrono::Local;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::log_writer::{Enqueued, LogWriter};

/// Per-frame summary handed back to the on-screen display. Never logged.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlayText {
    pub frame_number: u64,
    pub text: String,
    pub x_offset: u32,
    pub y_offset: u32,
    pub font: &'static str,
    pub font_size: u32,
    /// Objects per class label, every class seen in the frame.
    pub counts: BTreeMap<String, usize>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FrameOutcome {
    pub queued: usize,
    pub dropped: usize,
}

pub struct FrameLogger {
    writer: LogWriter,
    track_bbox: bool,
    overlay: bool,
}

impl FrameLogger {
    pub fn new(writer: LogWriter, track_bbox: bool, overlay: bool) -> Self {
        Self {
            writer,
            track_bbox,
            overlay,
        }
    }

    /// Logs every object of `frame` in traversal order and, when the overlay
    /// is enabled, returns the per-class summary for the display.
    pub async fn on_frame(&self, frame: &FrameMeta) -> Result<(FrameOutcome, Option<OverlayText>)> {
        let mut outcome = FrameOutcome::default();
        let mut tally: BTreeMap<u32, usize> = BTreeMap::new();

        for object in &frame.objects {
            let record = DetectionRecord {
                timestamp: Local::now(),
                frame_number: frame.frame_number,
                class_id: object.class_id,
                confidence: object.confidence,
                bounding_box: if self.track_bbox {
                    object.rect.map(BoundingBox::from)
                } else {
                    None
                },
            };
            let line = record.to_line();
            tracing::trace!(%line, "detection");

            match self.writer.write_line(line).await? {
                Enqueued::Queued => outcome.queued += 1,
                Enqueued::Dropped => outcome.dropped += 1,
            }
            *tally.entry(object.class_id).or_default() += 1;
        }

        let overlay = self
            .overlay
            .then(|| overlay_for(frame.frame_number, frame.objects.len(), &tally));
        Ok((outcome, overlay))
    }
}

fn overlay_for(frame_number: u64, total: usize, tally: &BTreeMap<u32, usize>) -> OverlayText {
    let count = |class: u32| tally.get(&class).copied().unwrap_or(0);
    OverlayText {
        frame_number,
        text: format!(
            "Frame Number={} Number of Objects={} Vehicle_count={} Person_count={}",
            frame_number,
            total,
            count(CLASS_VEHICLE),
            count(CLASS_PERSON)
        ),
        x_offset: 10,
        y_offset: 12,
        font: "Serif",
        font_size: 10,
        counts: tally
            .iter()
            .map(|(&class, &n)| {
                let label = class_label(class)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("class_{class}"));
                (label, n)
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_writer::{WriterError, WriterOptions};
    use argus_types::{ObjectMeta, Rect};
    use tempfile::tempdir;

    fn object(class_id: u32, confidence: f32, rect: Option<Rect>) -> ObjectMeta {
        ObjectMeta {
            class_id,
            confidence,
            rect,
        }
    }

    #[tokio::test]
    async fn logs_one_line_per_object_in_order() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("log.txt");
        let (writer, task) = LogWriter::spawn(path.clone(), WriterOptions::default());
        let logger = FrameLogger::new(writer, false, false);

        let frames = vec![
            FrameMeta {
                frame_number: 0,
                objects: vec![object(0, 0.9, None), object(2, 0.5, None)],
            },
            FrameMeta {
                frame_number: 1,
                objects: vec![],
            },
            FrameMeta {
                frame_number: 2,
                objects: vec![object(3, 0.12345, None)],
            },
        ];
        for frame in &frames {
            let (outcome, overlay) = logger.on_frame(frame).await.expect("frame");
            assert_eq!(outcome.queued, frame.objects.len());
            assert!(overlay.is_none());
        }
        drop(logger);
        task.finish().await.expect("finish");

        let content = std::fs::read_to_string(&path).expect("read");
        let records: Vec<DetectionRecord> = content
            .lines()
            .map(|l| l.parse().expect("line matches layout"))
            .collect();
        assert_eq!(records.len(), 3);
        assert_eq!(
            records
                .iter()
                .map(|r| (r.frame_number, r.class_id))
                .collect::<Vec<_>>(),
            vec![(0, 0), (0, 2), (2, 3)]
        );
        assert!(content.lines().nth(1).expect("line").ends_with("Confidence:0.5000"));
        assert!(content.lines().nth(2).expect("line").ends_with("Confidence:0.1235"));
    }

    #[tokio::test]
    async fn bbox_only_when_tracking() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("log.txt");
        let (writer, task) = LogWriter::spawn(path.clone(), WriterOptions::default());
        let rect = Rect {
            left: 1.0,
            top: 2.0,
            width: 30.0,
            height: 40.0,
        };

        let tracking = FrameLogger::new(writer.clone(), true, false);
        let plain = FrameLogger::new(writer, false, false);
        let frame = FrameMeta {
            frame_number: 5,
            objects: vec![object(0, 0.75, Some(rect)), object(1, 0.6, None)],
        };
        tracking.on_frame(&frame).await.expect("frame");
        plain.on_frame(&frame).await.expect("frame");
        drop((tracking, plain));
        task.finish().await.expect("finish");

        let content = std::fs::read_to_string(&path).expect("read");
        let lines: Vec<&str> = content.lines().collect();
        assert!(lines[0].ends_with("Confidence:0.7500, BBox:(1,2,30,40)"));
        assert!(lines[1].ends_with("Confidence:0.6000"));
        assert!(lines[2].ends_with("Confidence:0.7500"));
        assert!(lines[3].ends_with("Confidence:0.6000"));
    }

    #[tokio::test]
    async fn overlay_counts_vehicles_and_people() {
        let dir = tempdir().expect("tempdir");
        let (writer, task) = LogWriter::spawn(dir.path().join("log.txt"), WriterOptions::default());
        let logger = FrameLogger::new(writer, false, true);

        let frame = FrameMeta {
            frame_number: 12,
            objects: vec![
                object(0, 0.9, None),
                object(2, 0.8, None),
                object(0, 0.7, None),
                object(3, 0.6, None),
                object(9, 0.5, None),
            ],
        };
        let (_, overlay) = logger.on_frame(&frame).await.expect("frame");
        let overlay = overlay.expect("overlay");
        assert_eq!(
            overlay.text,
            "Frame Number=12 Number of Objects=5 Vehicle_count=2 Person_count=1"
        );
        let counts: Vec<(&str, usize)> = overlay.counts.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        assert_eq!(counts, vec![("class_9", 1), ("person", 1), ("roadsign", 1), ("vehicle", 2)]);

        let (_, empty) = logger
            .on_frame(&FrameMeta {
                frame_number: 13,
                objects: vec![],
            })
            .await
            .expect("frame");
        assert_eq!(
            empty.expect("overlay").text,
            "Frame Number=13 Number of Objects=0 Vehicle_count=0 Person_count=0"
        );
        drop(logger);
        task.finish().await.expect("finish");
    }

    #[tokio::test]
    async fn stopped_writer_is_an_error() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("log.txt");
        std::fs::create_dir_all(&path).expect("mkdir");
        let (writer, task) = LogWriter::spawn(path, WriterOptions::default());
        assert!(task.finish().await.is_err());

        let logger = FrameLogger::new(writer, false, false);
        let err = logger
            .on_frame(&FrameMeta {
                frame_number: 0,
                objects: vec![object(0, 0.5, None)],
            })
            .await
            .expect_err("writer is gone");
        assert_eq!(err.downcast_ref::<WriterError>(), Some(&WriterError::Closed));
    }
}
