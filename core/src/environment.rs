//! Injected dependencies.
//!
//! The engine never reads the system time directly; it asks a [`Clock`] so
//! tests can pin `requested.sent_at`.

use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Source of the timestamp stamped on a request when it is sent.
///
/// ```
/// use chrono::{DateTime, Utc};
/// use request_lifecycle_core::environment::Clock;
///
/// struct Pinned(DateTime<Utc>);
///
/// impl Clock for Pinned {
///     fn now(&self) -> DateTime<Utc> {
///         self.0
///     }
/// }
///
/// let sent_at = Pinned(DateTime::<Utc>::UNIX_EPOCH).now();
/// assert_eq!(sent_at.timestamp(), 0);
/// ```
pub trait Clock: Send + Sync {
    /// Instant to record as `requested.sent_at`
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock, read through [`Utc::now`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock handle held by the initiator configuration
pub type SharedClock = Arc<dyn Clock>;

impl SystemClock {
    /// Wall clock as a [`SharedClock`]
    #[must_use]
    pub fn shared() -> SharedClock {
        Arc::new(Self)
    }
}
