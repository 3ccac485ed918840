use std::sync::RwLock;

/// Fixed-capacity byte log with overwrite-oldest semantics. One writer (the
/// session read loop), any number of snapshot readers. Bytes are stored
/// verbatim; no CR/LF folding, no escape-sequence interpretation.
pub struct RingBuffer {
    inner: RwLock<RingState>,
}

struct RingState {
    data: Vec<u8>,
    head: usize,
    len: usize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be non-zero");
        Self {
            inner: RwLock::new(RingState {
                data: vec![0; capacity],
                head: 0,
                len: 0,
            }),
        }
    }

    /// Appends `bytes` atomically. Input at least as long as the capacity
    /// keeps only its trailing `capacity` bytes; shorter input is copied in
    /// at most two contiguous segments, evicting the oldest bytes on
    /// overflow.
    pub fn write(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let mut state = self.inner.write().expect("ring buffer lock poisoned");
        let capacity = state.data.len();

        if bytes.len() >= capacity {
            let tail = &bytes[bytes.len() - capacity..];
            state.data.copy_from_slice(tail);
            state.head = 0;
            state.len = capacity;
            return;
        }

        let write_at = (state.head + state.len) % capacity;
        let first = bytes.len().min(capacity - write_at);
        state.data[write_at..write_at + first].copy_from_slice(&bytes[..first]);
        if first < bytes.len() {
            let rest = bytes.len() - first;
            state.data[..rest].copy_from_slice(&bytes[first..]);
        }

        let overflow = (state.len + bytes.len()).saturating_sub(capacity);
        state.head = (state.head + overflow) % capacity;
        state.len = (state.len + bytes.len()).min(capacity);
    }

    /// Contiguous copy of everything currently retained, in write order.
    pub fn snapshot(&self) -> Vec<u8> {
        let state = self.inner.read().expect("ring buffer lock poisoned");
        let capacity = state.data.len();
        let mut out = Vec::with_capacity(state.len);
        let first = state.len.min(capacity - state.head);
        out.extend_from_slice(&state.data[state.head..state.head + first]);
        if first < state.len {
            out.extend_from_slice(&state.data[..state.len - first]);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("ring buffer lock poisoned").len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner
            .read()
            .expect("ring buffer lock poisoned")
            .data
            .len()
    }

    pub fn reset(&self) {
        let mut state = self.inner.write().expect("ring buffer lock poisoned");
        state.head = 0;
        state.len = 0;
    }
}
