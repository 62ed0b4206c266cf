//! Interrupt requests.
//!
//! The CLI wires SIGINT/SIGTERM to the process-wide flag. The orchestrator
//! polls its flag at stage boundaries up to (not after) the start of apply,
//! so an interrupt turns into an orderly abort and the lock and maintenance
//! guards are released by their destructors.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

static GLOBAL: OnceLock<InterruptFlag> = OnceLock::new();

#[derive(Debug, Clone, Default)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    /// A private flag, independent of the process-wide one
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide flag signal handlers set
    pub fn global() -> Self {
        GLOBAL.get_or_init(InterruptFlag::new).clone()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
