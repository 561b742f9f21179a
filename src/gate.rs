//! Back-off gate that lets a task run only on every Nth scheduler tick.

use std::sync::Mutex;

/// Counts scheduler ticks and fires once every `threshold` of them.
#[derive(Debug)]
pub struct CycleGate {
    threshold: i64,
    counter: Mutex<i64>,
}

impl CycleGate {
    /// A threshold of 0 is treated as 1 (fire on every tick).
    pub fn new(threshold: u32) -> Self {
        let threshold = i64::from(threshold.max(1));
        Self {
            threshold,
            counter: Mutex::new(threshold),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold as u32
    }

    /// Record one tick. Returns true when this tick is due to run a cycle.
    pub fn tick(&self) -> bool {
        let mut counter = self.counter.lock().unwrap_or_else(|e| e.into_inner());
        *counter -= 1;
        if *counter <= 0 {
            *counter = self.threshold;
            true
        } else {
            false
        }
    }
}
