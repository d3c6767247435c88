//! Per-source batch assembly

use dlpstream_core::{RawItem, SequenceRange};

/// Items from one source, in submission order, classified together
#[derive(Debug, Clone)]
pub struct Batch {
    pub source_id: String,
    pub items: Vec<RawItem>,
}

impl Batch {
    /// Payloads in order, as handed to the redaction client
    pub fn payloads(&self) -> Vec<String> {
        self.items.iter().map(|i| i.payload.clone()).collect()
    }

    /// First and last sequence in the batch
    pub fn range(&self) -> Option<SequenceRange> {
        let first = self.items.first()?.sequence;
        let last = self.items.last()?.sequence;
        Some(SequenceRange { first, last })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Buffer that cuts batches by item count or payload size
#[derive(Debug)]
pub struct BatchBuffer {
    source_id: String,
    items: Vec<RawItem>,
    bytes: usize,

    /// Flush once this many items are buffered
    max_items: usize,

    /// Flush before the payload total would exceed this
    max_bytes: usize,
}

impl BatchBuffer {
    /// Create a new batch buffer
    ///
    /// # Arguments
    /// * `max_items` - Item count that triggers a flush
    /// * `max_bytes` - Payload byte total a batch may not exceed (a single
    ///   oversized item still forms its own batch)
    pub fn new(source_id: impl Into<String>, max_items: usize, max_bytes: usize) -> Self {
        Self {
            source_id: source_id.into(),
            items: Vec::with_capacity(max_items.min(1024)),
            bytes: 0,
            max_items: max_items.max(1),
            max_bytes: max_bytes.max(1),
        }
    }

    /// Add an item, returning every batch that became ready
    ///
    /// At most two batches come back: the previous contents when the new item
    /// would overflow the byte limit, and the new contents when they reach the
    /// item limit.
    pub fn push(&mut self, item: RawItem) -> Vec<Batch> {
        let mut ready = Vec::new();

        if !self.items.is_empty() && self.bytes + item.payload.len() > self.max_bytes {
            ready.extend(self.take());
        }

        self.bytes += item.payload.len();
        self.items.push(item);

        if self.items.len() >= self.max_items || self.bytes >= self.max_bytes {
            ready.extend(self.take());
        }
        ready
    }

    /// Drain whatever is buffered into a batch
    pub fn take(&mut self) -> Option<Batch> {
        if self.items.is_empty() {
            return None;
        }
        self.bytes = 0;
        Some(Batch {
            source_id: self.source_id.clone(),
            items: std::mem::take(&mut self.items),
        })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
