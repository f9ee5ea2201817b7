//! Process-wide shutdown capability.
//!
//! The bridge never owns the process lifecycle.  On a fatal condition it calls
//! [`ShutdownSignal::request_shutdown`] and leaves the rest to the lifecycle
//! driver, which awaits [`ProcessShutdown::cancelled`] and then tears the
//! bridge down.

use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Capability to ask the surrounding process to shut down.
pub trait ShutdownSignal: Send + Sync {
    fn request_shutdown(&self, reason: &str);
}

/// [`ShutdownSignal`] backed by a [`CancellationToken`].
///
/// The first request wins: its reason is recorded and the token is cancelled.
/// Later requests are logged and otherwise ignored.
#[derive(Debug, Clone, Default)]
pub struct ProcessShutdown {
    token: CancellationToken,
    reason: Arc<OnceLock<String>>,
}

impl ProcessShutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Completes once shutdown has been requested.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// A token that is cancelled together with this shutdown.
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    pub fn is_requested(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Reason given by the first request, if any.
    pub fn reason(&self) -> Option<&str> {
        self.reason.get().map(String::as_str)
    }
}

impl ShutdownSignal for ProcessShutdown {
    fn request_shutdown(&self, reason: &str) {
        if self.reason.set(reason.to_string()).is_ok() {
            warn!("shutdown requested: {reason}");
            self.token.cancel();
        } else {
            debug!("shutdown already requested; ignoring: {reason}");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
