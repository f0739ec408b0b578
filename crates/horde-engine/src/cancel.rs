use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{HordeError, Operation};

/// Shared stop flag checked before and after every blocking step of a
/// generation. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    stop_flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.stop_flag.load(Ordering::SeqCst)
    }

    pub fn check(&self, operation: Operation) -> Result<(), HordeError> {
        if self.is_cancelled() {
            return Err(HordeError::Cancelled { operation });
        }
        Ok(())
    }
}
