use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

/// Bounded, recency-ordered set of record ids (front = oldest).
///
/// Process-local; the insert-then-evict step runs under one lock so the
/// capacity bound and eviction order hold under concurrent activation.
pub struct WorkingMemory {
    capacity: usize,
    slots: Mutex<VecDeque<String>>,
}

impl WorkingMemory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            slots: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Mark `id` most recent. Returns the id evicted to make room, if any.
    pub fn activate(&self, id: &str) -> Option<String> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pos) = slots.iter().position(|existing| existing == id) {
            slots.remove(pos);
        }
        slots.push_back(id.to_string());
        if slots.len() > self.capacity {
            slots.pop_front()
        } else {
            None
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|existing| existing == id)
    }

    pub fn remove(&self, id: &str) -> bool {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        match slots.iter().position(|existing| existing == id) {
            Some(pos) => {
                slots.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Oldest first.
    pub fn snapshot(&self) -> Vec<String> {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
