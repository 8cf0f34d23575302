//! Bounded capture of worker output.

use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};

/// Bytes of worker output kept for diagnostics.
pub const DEFAULT_TAIL_CAP: usize = 20_000;

/// Append-only text buffer that keeps only the most recent `cap` bytes.
///
/// Trimming never splits a UTF-8 character, so the buffer may briefly hold
/// slightly less than `cap` bytes.
#[derive(Debug, Clone)]
pub struct CappedBuffer {
    cap: usize,
    text: String,
}

impl CappedBuffer {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            text: String::new(),
        }
    }

    pub fn push(&mut self, chunk: &str) {
        self.text.push_str(chunk);
        if self.text.len() > self.cap {
            let mut cut = self.text.len() - self.cap;
            while !self.text.is_char_boundary(cut) {
                cut += 1;
            }
            self.text.drain(..cut);
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

impl Default for CappedBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_TAIL_CAP)
    }
}

/// Read the last `cap` bytes of a log file.
///
/// Returns `None` when the file is missing, unreadable or empty.
pub async fn read_log_tail(path: &Path, cap: usize) -> Option<String> {
    let mut file = tokio::fs::File::open(path).await.ok()?;
    let len = file.metadata().await.ok()?.len();
    let start = len.saturating_sub(cap as u64);
    file.seek(SeekFrom::Start(start)).await.ok()?;

    let mut buffer = CappedBuffer::new(cap);
    let mut chunk = vec![0u8; 8192];
    let mut pending: Vec<u8> = Vec::new();
    loop {
        let n = file.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        pending.extend_from_slice(&chunk[..n]);
        let valid = match std::str::from_utf8(&pending) {
            Ok(_) => pending.len(),
            Err(e) => e.valid_up_to(),
        };
        buffer.push(&String::from_utf8_lossy(&pending[..valid]));
        pending.drain(..valid);
        // A sequence that can never complete would otherwise be held forever.
        if pending.len() >= 4 {
            buffer.push(&String::from_utf8_lossy(&pending));
            pending.clear();
        }
    }
    if !pending.is_empty() {
        buffer.push(&String::from_utf8_lossy(&pending));
    }

    if buffer.is_empty() {
        None
    } else {
        Some(buffer.into_string())
    }
}
