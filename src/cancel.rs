use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Run-wide stop signal shared by the run owner and every download worker.
///
/// Once cancelled it stays cancelled; a new process is needed to resume.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
