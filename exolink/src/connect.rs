//! Connection establishment with bounded retry.
//!
//! The target process may not have created its listening endpoint when
//! the host starts. That race is benign and expected; the establisher keeps
//! trying through that window and through transient contention, and only
//! reports failure once the attempt budget is spent or the failure is one
//! retrying cannot fix.

use std::io;
use std::time::Duration;

use tracing::debug;

use crate::connection::Connection;
use crate::endpoint::{Endpoint, OpenError};
use crate::error::ConnectError;

/// Retry policy for [`connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::exhaustive_structs)] // plain configuration; callers build it literally
pub struct ConnectOptions {
    /// Maximum number of open attempts before giving up.
    pub max_attempts: u32,
    /// Sleep between attempts after a generic open failure.
    pub per_attempt_wait: Duration,
    /// How long to wait for a busy endpoint to free up.
    pub busy_wait: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            max_attempts: 32,
            per_attempt_wait: Duration::from_millis(1000),
            busy_wait: Duration::from_millis(60_000),
        }
    }
}

/// Opens `name` on `endpoint`, retrying per `options`, and returns a
/// ready [`Connection`] with both lanes idle.
///
/// A busy endpoint (exists, cannot take a connection) gets the bounded
/// busy wait before the next attempt; any other transient failure gets
/// the per-attempt sleep. Unrecoverable failures, such as permission
/// denied, abort immediately instead of spending the attempt budget.
pub async fn connect<E: Endpoint>(
    endpoint: &E,
    name: &str,
    options: &ConnectOptions,
) -> Result<Connection<E::Stream>, ConnectError> {
    for attempt in 1..=options.max_attempts {
        debug!(name, attempt, max = options.max_attempts, "opening endpoint");
        match endpoint.open(name).await {
            Ok(stream) => {
                debug!(name, attempt, "endpoint open");
                return Ok(Connection::new(stream));
            }
            Err(OpenError::Busy) => {
                debug!(name, "endpoint busy; waiting for it to free up");
                endpoint.wait_ready(name, options.busy_wait).await;
            }
            Err(OpenError::Os(e)) if unrecoverable(&e) => {
                return Err(ConnectError::OsFailure(e));
            }
            Err(OpenError::Os(e)) => {
                debug!(name, error = %e, "open failed; retrying");
                tokio::time::sleep(options.per_attempt_wait).await;
            }
        }
    }
    Err(ConnectError::Timeout {
        attempts: options.max_attempts,
    })
}

/// Open failures that no amount of retrying can fix.
fn unrecoverable(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::PermissionDenied | io::ErrorKind::InvalidInput | io::ErrorKind::Unsupported
    )
}
