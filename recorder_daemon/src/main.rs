use anyhow::{Context, Result};
use recorder::config::RecorderConfig;
use recorder::frame_logger::{FrameLogger, OverlayText};
use recorder::frame_source::FrameSource;
use recorder::log_index::discover_logs;
use recorder::log_writer::{LogWriter, WriterOptions};
use recorder::pipeline::{self, PipelineSpec};
use std::env;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::io::{AsyncBufRead, BufReader};
use tracing::{error, info, warn};

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let Some(device) = parse_device(&args) else {
        let prog = args.first().map(String::as_str).unwrap_or("recorder_daemon");
        eprintln!("usage: {prog} <v4l2-device-path>");
        return ExitCode::from(1);
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(device)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(err = ?e, "recorder daemon failed");
            ExitCode::FAILURE
        }
    }
}

fn parse_device(args: &[String]) -> Option<PathBuf> {
    match args {
        [_, device] if !device.trim().is_empty() => Some(PathBuf::from(device)),
        _ => None,
    }
}

async fn run(device: PathBuf) -> Result<()> {
    info!("starting argus recorder");

    let config = RecorderConfig::from_env()?;

    let spec = PipelineSpec::camera(&device, &config.pgie_config);
    spec.validate().context("invalid pipeline configuration")?;
    info!(launch = %spec.launch_description(), probe = spec.probe_element(), "pipeline");
    info!(relay = %pipeline::rtsp_relay_launch(), "rtsp relay");
    info!(url = %pipeline::rtsp_url(), "RTSP stream available");

    let options = WriterOptions {
        capacity: config.queue_capacity,
        enqueue_timeout: config.enqueue_timeout,
        backpressure: config.backpressure,
        max_bytes: config.log_max_bytes,
        keep_files: config.log_keep_files,
    };
    let existing = discover_logs(&config.log_path).context("failed to scan log directory")?;
    info!(path = ?config.log_path, files = existing.len(), "detection log");
    let (writer, writer_task) = LogWriter::spawn(config.log_path.clone(), options);
    let logger = FrameLogger::new(writer, config.track_bbox, config.overlay);

    let input: Box<dyn AsyncBufRead + Unpin + Send> = match &config.frame_input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open frame input {:?}", path))?;
            info!(path = ?path, "reading frame metadata from file");
            Box::new(BufReader::new(file))
        }
        None => {
            info!("reading frame metadata from stdin");
            Box::new(BufReader::new(tokio::io::stdin()))
        }
    };

    let loop_result = frame_loop(&logger, FrameSource::new(input)).await;

    // Dropping the last producer closes the queue so the writer can drain.
    drop(logger);
    let stats = writer_task.finish().await;

    match (&loop_result, &stats) {
        (Ok(frames), Ok(stats)) => info!(
            frames,
            written = stats.written(),
            dropped = stats.dropped(),
            rotations = stats.rotations(),
            "argus recorder stopped"
        ),
        (_, Err(e)) => error!(err = ?e, "log writer did not shut down cleanly"),
        _ => {}
    }

    // A writer failure is the root cause of a closed-queue loop error.
    stats?;
    loop_result.map(|_| ())
}

async fn frame_loop<R: AsyncBufRead + Unpin>(
    logger: &FrameLogger,
    mut source: FrameSource<R>,
) -> Result<u64> {
    let mut frames = 0u64;
    loop {
        let next = tokio::select! {
            next = source.next_frame() => next?,
            _ = tokio::signal::ctrl_c() => {
                info!("received shutdown signal, stopping");
                break;
            }
        };
        let Some(frame) = next else {
            info!("frame input closed");
            break;
        };

        let (outcome, overlay) = logger.on_frame(&frame).await?;
        if outcome.dropped > 0 {
            warn!(frame = frame.frame_number, dropped = outcome.dropped, "detections dropped");
        }
        if let Some(overlay) = overlay {
            emit_overlay(&overlay)?;
        }
        frames += 1;
    }
    if source.malformed() > 0 {
        warn!(malformed = source.malformed(), "skipped malformed frame metadata lines");
    }
    Ok(frames)
}

/// Overlay text goes back to the display stage on stdout, one JSON object per frame.
fn emit_overlay(overlay: &OverlayText) -> Result<()> {
    let body = serde_json::to_string(overlay)?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{body}")?;
    stdout.flush()?;
    Ok(())
}
