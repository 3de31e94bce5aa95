use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::warn;

use crate::error::{HelperError, Result};

/// Cooperative cancellation shared with a signal handler.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// The raw flag, for registration with a signal handler.
    pub fn as_arc(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }
}

/// Per-run context handed to an agent.
#[derive(Clone, Debug)]
pub struct Session {
    pub content: i32,
    cancel: CancelFlag,
}

impl Session {
    pub fn new(content: i32) -> Self {
        Self::with_cancel(content, CancelFlag::new())
    }

    pub fn with_cancel(content: i32, cancel: CancelFlag) -> Self {
        Self { content, cancel }
    }

    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(HelperError::Cancelled)
        } else {
            Ok(())
        }
    }
}

pub fn error_marker_path(pipe_base: &Path) -> PathBuf {
    let mut s = pipe_base.as_os_str().to_owned();
    s.push("_error");
    PathBuf::from(s)
}

/// Leave `<pipe-base>_error` behind for failures an orchestrator cannot see
/// through the pipes themselves: a dying plugin or a termination request.
pub(crate) fn mark_failure(pipe_base: &Path, err: &HelperError) {
    if !matches!(err.code(), "UPSTREAM" | "CANCELLED") {
        return;
    }
    let path = error_marker_path(pipe_base);
    if let Err(e) = std::fs::File::create(&path) {
        warn!(marker = %path.display(), error = %e, "cannot write error marker");
    }
}
