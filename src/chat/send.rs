//! Send-path guards: single-flight gate, text validation, upload ceiling.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use super::error::{ChatError, ChatResult};

/// Attachment ready to be uploaded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileUpload {
    /// File name reported to the server.
    pub file_name: String,
    /// Raw content.
    pub bytes: Vec<u8>,
    /// MIME type, if known.
    pub content_type: Option<String>,
}

impl FileUpload {
    /// Create an upload from in-memory bytes.
    #[must_use]
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
            content_type: None,
        }
    }

    /// Set the MIME type.
    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Read a file from disk, refusing it before reading if it exceeds `limit`.
    ///
    /// # Errors
    /// Returns [`ChatError::FileTooLarge`] above the limit, or an IO error.
    pub async fn from_path(path: &Path, limit: u64) -> ChatResult<Self> {
        let size = tokio::fs::metadata(path).await?.len();
        check_file_size(size, limit)?;
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map_or_else(|| "file".to_string(), |n| n.to_string_lossy().into_owned());
        let upload = Self::new(file_name, bytes);
        Ok(match guess_content_type(path) {
            Some(mime) => upload.with_content_type(mime),
            None => upload,
        })
    }

    /// Size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        u64::try_from(self.bytes.len()).unwrap_or(u64::MAX)
    }
}

/// MIME type for the attachment kinds the chat accepts, by extension.
fn guess_content_type(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => return None,
    };
    Some(mime)
}

/// Return the trimmed body, or reject it when nothing is left.
///
/// # Errors
/// Returns [`ChatError::EmptyMessage`] for empty or whitespace-only input.
pub fn validate_text(body: &str) -> ChatResult<&str> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(ChatError::EmptyMessage);
    }
    Ok(trimmed)
}

/// Reject attachments above the ceiling.
///
/// # Errors
/// Returns [`ChatError::FileTooLarge`] when `size > limit`.
pub const fn check_file_size(size: u64, limit: u64) -> ChatResult<()> {
    if size > limit {
        return Err(ChatError::FileTooLarge { size, limit });
    }
    Ok(())
}

/// Single-flight gate shared by the text and file send paths.
#[derive(Debug, Default)]
pub struct SendGate {
    in_flight: AtomicBool,
}

impl SendGate {
    /// Create an idle gate.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            in_flight: AtomicBool::new(false),
        }
    }

    /// Try to start a send. `None` while another send holds the gate.
    #[must_use]
    pub fn try_acquire(&self) -> Option<SendPermit<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SendPermit { gate: self })
    }

    /// Whether a send is in flight.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }
}

/// Held for the duration of one send; releases the gate when dropped.
#[derive(Debug)]
pub struct SendPermit<'a> {
    gate: &'a SendGate,
}

impl Drop for SendPermit<'_> {
    fn drop(&mut self) {
        self.gate.in_flight.store(false, Ordering::Release);
    }
}
