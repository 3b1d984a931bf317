use super::{StatusEvent, StatusSink};
use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

/// Keeps the most recent events in a bounded ring buffer.
pub struct MemoryStatusSink {
    buffer: Arc<RwLock<VecDeque<StatusEvent>>>,
    capacity: usize,
}

impl MemoryStatusSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Arc::new(RwLock::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn get_recent(&self) -> Vec<StatusEvent> {
        match self.buffer.read() {
            Ok(buffer) => buffer.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }

    // Lets callers keep reading after the sink is handed to a logger.
    pub fn clone_buffer(&self) -> Arc<RwLock<VecDeque<StatusEvent>>> {
        self.buffer.clone()
    }
}

impl StatusSink for MemoryStatusSink {
    fn emit(&self, event: &StatusEvent) {
        let mut buffer = match self.buffer.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if buffer.len() >= self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(event.clone());
    }
}
