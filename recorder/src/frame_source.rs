use anyhow::{Context, Result};
use argus_types::FrameMeta;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Line-delimited JSON bridge from the pipeline's metadata probe.
pub struct FrameSource<R> {
    reader: R,
    buf: Vec<u8>,
    line_no: u64,
    malformed: u64,
}

impl<R: AsyncBufRead + Unpin> FrameSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            line_no: 0,
            malformed: 0,
        }
    }

    /// Next frame in arrival order; `None` at end of input. Blank and
    /// malformed lines, including ones that are not UTF-8, are skipped.
    pub async fn next_frame(&mut self) -> Result<Option<FrameMeta>> {
        loop {
            self.buf.clear();
            let read = self
                .reader
                .read_until(b'\n', &mut self.buf)
                .await
                .context("read frame metadata")?;
            if read == 0 {
                return Ok(None);
            }
            self.line_no += 1;

            let line = match std::str::from_utf8(&self.buf) {
                Ok(line) => line.trim(),
                Err(e) => {
                    self.skip(&e);
                    continue;
                }
            };
            if line.is_empty() {
                continue;
            }
            match FrameMeta::from_json_line(line) {
                Ok(frame) => return Ok(Some(frame)),
                Err(e) => self.skip(&e),
            }
        }
    }

    pub fn malformed(&self) -> u64 {
        self.malformed
    }

    fn skip(&mut self, err: &dyn std::fmt::Display) {
        self.malformed += 1;
        tracing::warn!(line = self.line_no, err = %err, "skipping malformed frame metadata");
    }
}
