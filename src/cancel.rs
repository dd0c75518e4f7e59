//! Cooperative cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Result, ShardsumError};

/// A cloneable cancellation flag.
///
/// A child token observes its own flag and those of its ancestors;
/// cancelling a child does not cancel the parent. The orchestrator hands each
/// level a child of the caller's token so a failing batch can stop its
/// siblings without tripping the caller's token.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
    ancestors: Vec<Arc<AtomicBool>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that is cancelled when either it or `self` is cancelled.
    pub fn child(&self) -> Self {
        let mut ancestors = self.ancestors.clone();
        ancestors.push(self.flag.clone());
        CancellationToken {
            flag: Arc::new(AtomicBool::new(false)),
            ancestors,
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
            || self
                .ancestors
                .iter()
                .any(|ancestor| ancestor.load(Ordering::SeqCst))
    }

    /// `Err(Cancelled)` once cancelled.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(ShardsumError::Cancelled)
        } else {
            Ok(())
        }
    }
}
