//! Capped log buffers for run output
//!
//! Polling clients read whole buffers, so each buffer keeps a bounded window
//! of the most recent output and serializes as one string.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Serialize, Serializer};

/// Maximum number of stored chunks per buffer
const MAX_CHUNKS: usize = 500;

/// Shared, capped, append-only log buffer.
///
/// Clones share the same storage so stream callbacks can append while the
/// store hands out run snapshots.
#[derive(Clone, Default)]
pub struct LogBuffer {
    chunks: Arc<Mutex<VecDeque<String>>>,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk of output, evicting the oldest past the cap
    pub fn append(&self, chunk: &str) {
        if chunk.is_empty() {
            return;
        }

        let mut chunks = self.chunks.lock();
        if chunks.len() == MAX_CHUNKS {
            chunks.pop_front();
        }
        chunks.push_back(chunk.to_string());
    }

    /// Concatenated buffer contents
    pub fn contents(&self) -> String {
        self.chunks.lock().iter().map(String::as_str).collect()
    }

    /// Last `max_chars` characters, for packing into error messages
    pub fn tail(&self, max_chars: usize) -> String {
        let contents = self.contents();
        let start = contents
            .char_indices()
            .rev()
            .nth(max_chars.saturating_sub(1))
            .map(|(i, _)| i)
            .unwrap_or(0);
        contents[start..].to_string()
    }

    /// Drop all stored output
    pub fn clear(&self) {
        self.chunks.lock().clear();
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.lock().is_empty()
    }
}

impl Serialize for LogBuffer {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.contents())
    }
}

impl std::fmt::Debug for LogBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LogBuffer({} chunks)", self.chunks.lock().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_contents() {
        let buffer = LogBuffer::new();
        buffer.append("npm install\n");
        buffer.append("added 200 packages\n");

        assert_eq!(buffer.contents(), "npm install\nadded 200 packages\n");
    }

    #[test]
    fn test_cap_evicts_oldest() {
        let buffer = LogBuffer::new();
        for i in 0..MAX_CHUNKS + 10 {
            buffer.append(&format!("{}\n", i));
        }

        let contents = buffer.contents();
        assert!(!contents.starts_with("0\n"));
        assert!(contents.ends_with(&format!("{}\n", MAX_CHUNKS + 9)));
    }

    #[test]
    fn test_tail() {
        let buffer = LogBuffer::new();
        buffer.append("0123456789");

        assert_eq!(buffer.tail(4), "6789");
        assert_eq!(buffer.tail(100), "0123456789");
    }

    #[test]
    fn test_clones_share_storage() {
        let buffer = LogBuffer::new();
        let clone = buffer.clone();

        clone.append("shared");
        assert_eq!(buffer.contents(), "shared");
    }
}
