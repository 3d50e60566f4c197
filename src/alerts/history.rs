//! Bounded per-target sample history

use std::collections::VecDeque;

/// FIFO of the most recent samples for one target
#[derive(Debug, Clone, PartialEq)]
pub struct History {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl History {
    /// A capacity of zero is raised to one
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest once full
    pub fn push(&mut self, value: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.capacity
    }

    /// Arithmetic mean of the retained samples
    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.samples.iter().copied().collect()
    }
}

/// Number of samples retained for a window polled every `interval_ms`
pub fn capacity_for(window_ms: f64, interval_ms: f64) -> usize {
    if interval_ms <= 0.0 {
        return 1;
    }
    ((window_ms / interval_ms).ceil() as usize).max(1)
}
