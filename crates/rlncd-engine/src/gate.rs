//! Admission gate bounding concurrent blocked encoders.
//!
//! While an encoder holds a slot it has told the kernel to stop feeding
//! plain packets, so the gate's capacity caps kernel-side block pressure.

use tokio::sync::Semaphore;

/// Counting semaphore over encoder admission slots.
pub struct EncoderGate {
    sem: Semaphore,
}

impl EncoderGate {
    pub fn new(slots: usize) -> Self {
        Self {
            sem: Semaphore::new(slots),
        }
    }

    /// Take a slot, waiting until one is free. Waiters are woken in FIFO
    /// order when slots return.
    pub async fn wait(&self) {
        // The semaphore is never closed, so acquire only fails if it were.
        if let Ok(permit) = self.sem.acquire().await {
            permit.forget();
        }
    }

    /// Return a slot and wake the oldest waiter.
    pub fn notify(&self) {
        self.sem.add_permits(1);
    }

    /// Number of free slots.
    pub fn count(&self) -> usize {
        self.sem.available_permits()
    }
}
