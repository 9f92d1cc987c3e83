use argus_types::{DetectionRecord, FrameMeta, ObjectMeta, Rect};
use recorder::frame_logger::FrameLogger;
use recorder::log_writer::{LogWriter, WriterOptions};
use std::time::Duration;
use tempfile::tempdir;

fn frame(frame_number: u64, objects: usize) -> FrameMeta {
    FrameMeta {
        frame_number,
        objects: (0..objects)
            .map(|i| ObjectMeta {
                class_id: (i % 4) as u32,
                confidence: 0.3 + (i as f32) * 0.01,
                rect: Some(Rect {
                    left: i as f32,
                    top: 2.0 * i as f32,
                    width: 64.0,
                    height: 128.0,
                }),
            })
            .collect(),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reader_never_sees_a_torn_line() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("log.txt");
    let (writer, task) = LogWriter::spawn(path.clone(), WriterOptions::default());
    let logger = FrameLogger::new(writer, true, false);

    let reader_path = path.clone();
    let reader = tokio::spawn(async move {
        let mut snapshots = 0usize;
        let mut last_len = 0usize;
        for _ in 0..200 {
            if let Ok(content) = tokio::fs::read_to_string(&reader_path).await {
                assert!(content.is_empty() || content.ends_with('\n'), "torn tail");
                for line in content.lines() {
                    line.parse::<DetectionRecord>().expect("complete line");
                }
                let lines = content.lines().count();
                assert!(lines >= last_len, "log shrank");
                last_len = lines;
                snapshots += 1;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        snapshots
    });

    let mut expected = 0;
    for n in 0..300u64 {
        let objects = (n % 5) as usize;
        expected += objects;
        logger.on_frame(&frame(n, objects)).await.expect("frame");
    }
    drop(logger);
    let stats = task.finish().await.expect("finish");
    assert!(reader.await.expect("reader") > 0);

    assert_eq!(stats.written() as usize, expected);
    let content = std::fs::read_to_string(&path).expect("read");
    let frames: Vec<u64> = content
        .lines()
        .map(|l| l.parse::<DetectionRecord>().expect("line").frame_number)
        .collect();
    assert_eq!(frames.len(), expected);
    assert!(frames.windows(2).all(|w| w[0] <= w[1]));
}
