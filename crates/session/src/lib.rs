//! kwatch sessions: one task per watched object feeding the snapshot tracker
//! and the diff renderer, plus the coordinator that launches them all under
//! one cancellation token.

#![forbid(unsafe_code)]

mod coordinator;
mod session;

use std::time::Duration;

pub use coordinator::{Coordinator, CoordinatorReport};
pub use session::{SessionReport, SessionState, StopReason, WatchSession};
pub use tokio_util::sync::CancellationToken;

/// Per-session watch duration when none is given.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Used when the configured timeout is zero.
pub const FALLBACK_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Resolve a user-supplied timeout: absent means the default, zero means an
/// hour.
pub fn effective_timeout(configured: Option<Duration>) -> Duration {
    match configured {
        None => DEFAULT_TIMEOUT,
        Some(d) if d.is_zero() => FALLBACK_TIMEOUT,
        Some(d) => d,
    }
}
