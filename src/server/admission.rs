//! Admission checks against the shared in-flight counters.
//!
//! Both checks only read the counters. The session itself adjusts them
//! through [`BytesGuard`](crate::BytesGuard) and
//! [`RequestGuard`](crate::RequestGuard).

use crate::{errors::Rejection, server::state::SharedState};

impl SharedState {
    /// Fails when the bytes in flight are strictly above the configured maximum.
    #[inline]
    pub fn check_bytes_in_flight(&self) -> Result<(), Rejection> {
        let bytes = self.in_flight().bytes();
        match bytes > self.server_limits.max_bytes_in_flight {
            true => Err(Rejection::TooManyBytes(bytes)),
            false => Ok(()),
        }
    }

    /// Fails when the open sessions are strictly above the configured maximum.
    /// A negative maximum disables the check.
    #[inline]
    pub fn check_requests_in_flight(&self) -> Result<(), Rejection> {
        let max = self.server_limits.max_requests_in_flight;
        if max < 0 {
            return Ok(());
        }

        let requests = self.in_flight().requests();
        match requests > max {
            true => Err(Rejection::TooManyRequests(requests)),
            false => Ok(()),
        }
    }
}
