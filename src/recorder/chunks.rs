use std::sync::Arc;

/// Ordered fragments recorded by the active session
#[derive(Debug, Default)]
pub struct ChunkBuffer {
    chunks: Vec<Arc<[u8]>>,
    bytes: usize,
}

impl ChunkBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment. Empty fragments are ignored.
    pub fn push(&mut self, chunk: Vec<u8>) -> bool {
        if chunk.is_empty() {
            return false;
        }
        self.bytes += chunk.len();
        self.chunks.push(chunk.into());
        true
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Total payload size in bytes
    pub fn total_bytes(&self) -> usize {
        self.bytes
    }

    /// Cheap copy of the fragments for handing off to transcoding
    pub fn snapshot(&self) -> Vec<Arc<[u8]>> {
        self.chunks.clone()
    }
}
