use std::sync::Arc;
use tokio::sync::Semaphore;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("flow-control window closed")]
pub struct WindowClosed;

/// Counted semaphore capping the number of unacknowledged items in flight.
/// Every send takes one unit, every acknowledgement gives one back.
pub struct WindowSemaphore {
    sem: Arc<Semaphore>,
    capacity: usize,
}

impl Clone for WindowSemaphore {
    fn clone(&self) -> Self { WindowSemaphore { sem: self.sem.clone(), capacity: self.capacity } }
}

impl WindowSemaphore {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        WindowSemaphore { sem: Arc::new(Semaphore::new(capacity)), capacity }
    }

    /// Wait for a free unit. The unit stays taken until [`WindowSemaphore::release`].
    pub async fn acquire(&self) -> Result<(), WindowClosed> {
        let permit = self.sem.acquire().await.map_err(|_| WindowClosed)?;
        permit.forget();
        Ok(())
    }

    pub fn try_acquire(&self) -> Result<bool, WindowClosed> {
        match self.sem.try_acquire() {
            Ok(permit) => { permit.forget(); Ok(true) }
            Err(tokio::sync::TryAcquireError::NoPermits) => Ok(false),
            Err(tokio::sync::TryAcquireError::Closed) => Err(WindowClosed),
        }
    }

    pub fn release(&self) {
        // stray acks never grow the window past its capacity
        if self.sem.available_permits() < self.capacity {
            self.sem.add_permits(1);
        }
    }

    /// Wake every blocked sender with [`WindowClosed`].
    pub fn close(&self) {
        self.sem.close();
    }

    pub fn capacity(&self) -> usize { self.capacity }

    pub fn in_flight(&self) -> usize {
        self.capacity.saturating_sub(self.sem.available_permits())
    }
}
