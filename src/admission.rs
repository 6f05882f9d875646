//! Bounded-wait admission control.
//!
//! A fixed pool of permits caps the number of concurrent transcription jobs.
//! Callers wait at most `timeout` for a permit; tokio semaphores hand permits
//! out in FIFO order. A granted [`Admission`] releases its permit when
//! dropped, so every exit path (success, error, panic, task abort) returns
//! capacity to the pool.

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("timed out after {0:?} waiting for a permit")]
    Timeout(Duration),
    #[error("permit pool closed")]
    Closed,
}

pub struct AdmissionController {
    capacity: usize,
    timeout: Duration,
    pool: OnceCell<Arc<Semaphore>>,
}

/// Proof of admission; holds one permit until dropped.
#[derive(Debug)]
pub struct Admission {
    _permit: OwnedSemaphorePermit,
}

impl AdmissionController {
    pub fn new(capacity: usize, timeout: Duration) -> Self {
        Self {
            capacity,
            timeout,
            pool: OnceCell::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Create the permit pool if it does not exist yet. Safe to call from any
    /// number of threads; the pool is built at most once.
    pub fn ensure(&self) -> &Arc<Semaphore> {
        self.pool
            .get_or_init(|| Arc::new(Semaphore::new(self.capacity)))
    }

    pub async fn acquire(&self) -> Result<Admission, AdmissionError> {
        let pool = self.ensure().clone();
        match tokio::time::timeout(self.timeout, pool.acquire_owned()).await {
            Ok(Ok(permit)) => Ok(Admission { _permit: permit }),
            Ok(Err(_)) => Err(AdmissionError::Closed),
            Err(_) => Err(AdmissionError::Timeout(self.timeout)),
        }
    }

    pub fn available(&self) -> usize {
        self.ensure().available_permits()
    }

    /// Permits currently held by admitted work.
    pub fn held(&self) -> usize {
        self.capacity.saturating_sub(self.available())
    }
}
