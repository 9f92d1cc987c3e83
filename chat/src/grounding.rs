use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// The detection log as seen at the start of a chat turn.
#[derive(Debug, Clone, PartialEq)]
pub enum GroundingContext {
    Present(String),
    /// The file exists but holds no complete line yet.
    Empty,
    Missing(PathBuf),
    Unreadable { path: PathBuf, reason: String },
}

impl GroundingContext {
    /// Text placed in the prompt's log section.
    pub fn prompt_text(&self) -> String {
        match self {
            Self::Present(text) => text.clone(),
            Self::Empty => "[detection log is empty: no detections recorded yet]".to_string(),
            Self::Missing(path) => format!(
                "[detection log not found at {}: no detections recorded yet]",
                path.display()
            ),
            Self::Unreadable { path, reason } => format!(
                "[detection log unreadable at {}: {reason}]",
                path.display()
            ),
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }
}

/// Reads the whole log. A trailing line without its newline is still being
/// written and is left out.
pub async fn read_grounding(path: &Path) -> GroundingContext {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let complete = match bytes.iter().rposition(|b| *b == b'\n') {
                Some(end) => &bytes[..=end],
                None => &[][..],
            };
            let text = String::from_utf8_lossy(complete);
            if text.trim().is_empty() {
                GroundingContext::Empty
            } else {
                GroundingContext::Present(text.into_owned())
            }
        }
        Err(e) if e.kind() == ErrorKind::NotFound => GroundingContext::Missing(path.to_path_buf()),
        Err(e) => {
            tracing::warn!(path = ?path, err = %e, "detection log unreadable");
            GroundingContext::Unreadable {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        }
    }
}

pub fn build_prompt(context: &GroundingContext, user_text: &str) -> String {
    format!(
        "--- Context from log ---\n{}\n--- User Question ---\n{}",
        context.prompt_text(),
        user_text
    )
}
