//! Capabilities the service needs from its host: time, identity, and a place
//! to report non-fatal failures.

use time::OffsetDateTime;
use tracing::warn;

use crate::error::TagError;
use crate::models::UserId;

/// Source of the current time for `tagged_on` defaults and audit entries.
pub trait Clock {
    fn now(&self) -> OffsetDateTime;
}

/// Wall-clock time in UTC.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// A clock frozen at a single instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub OffsetDateTime);

impl Clock for FixedClock {
    fn now(&self) -> OffsetDateTime {
        self.0
    }
}

/// Supplies the acting user for `tagger_id` defaults and audit entries.
pub trait UserContext {
    fn current_user(&self) -> UserId;
}

/// A user context that always answers with the same user.
#[derive(Debug, Clone, Copy)]
pub struct ActingUser(pub UserId);

impl UserContext for ActingUser {
    fn current_user(&self) -> UserId {
        self.0
    }
}

/// Receives per-row failures that batch operations skip over.
pub trait ErrorReporter {
    fn report(&self, error: &TagError);
}

/// Reports failures as `warn` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, error: &TagError) {
        warn!(%error, "association skipped");
    }
}
