//! Ambient resilience/observability wrapping around the dispatcher's handler
//! invocation step: a `tower::Service`-shaped load shed plus per-command
//! latency/outcome metrics.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use metrics::{counter, histogram};
use tower::Service;

use crate::command::HandlerContext;
use ember_core::{Command, Error};

/// Per-command-name latency and success/failure counters. Kept as a thin
/// wrapper over the `metrics` crate's global recorder rather than an
/// in-process table.
#[derive(Default)]
pub struct DispatchMetrics;

impl DispatchMetrics {
    pub fn record(&self, command: &str, success: bool) {
        let outcome = if success { "ok" } else { "error" };
        counter!("emberdb_commands_total", "command" => command.to_lowercase(), "outcome" => outcome).increment(1);
    }

    pub fn record_latency(&self, command: &str, elapsed: std::time::Duration) {
        histogram!("emberdb_command_duration_seconds", "command" => command.to_lowercase()).record(elapsed.as_secs_f64());
    }
}

/// Bounds the number of concurrently in-flight write commands. Rejects with
/// `Busy` instead of queuing once the bound is reached.
pub struct WriteLoadShed {
    in_flight: Arc<AtomicU32>,
    max_concurrent: u32,
}

impl WriteLoadShed {
    #[must_use]
    pub fn new(max_concurrent: u32) -> Self {
        Self {
            in_flight: Arc::new(AtomicU32::new(0)),
            max_concurrent,
        }
    }

    /// Acquires a permit for one write command, or `Busy` if the bound is
    /// already saturated. The returned guard releases the permit on drop.
    pub fn try_acquire(&self) -> Result<WriteLoadShedGuard, Error> {
        let current = self.in_flight.fetch_add(1, Ordering::AcqRel);
        if current >= self.max_concurrent {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            return Err(Error::busy("BUSY too many concurrent write commands"));
        }
        Ok(WriteLoadShedGuard {
            in_flight: Arc::clone(&self.in_flight),
        })
    }
}

pub struct WriteLoadShedGuard {
    in_flight: Arc<AtomicU32>,
}

impl Drop for WriteLoadShedGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A `tower::Service` adapter around a single handler invocation, so the
/// dispatcher's handler step can be composed with `tower` middleware
/// (`ServiceBuilder::new().layer(..)`). `HandlerRequest` bundles the token
/// slice and a prebuilt context; handlers themselves stay plain synchronous
/// functions.
pub struct HandlerService {
    handler: crate::command::Handler,
}

impl HandlerService {
    #[must_use]
    pub fn new(handler: crate::command::Handler) -> Self {
        Self { handler }
    }
}

pub struct HandlerRequest {
    pub ctx: HandlerContext,
    pub args: Command,
    pub command_name: String,
    pub started_at: Instant,
}

impl Service<HandlerRequest> for HandlerService {
    type Response = ember_core::RespValue;
    type Error = Error;
    type Future = std::future::Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: HandlerRequest) -> Self::Future {
        let result = (self.handler)(&req.ctx, &req.args);
        std::future::ready(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_shed_rejects_past_the_bound() {
        let shed = WriteLoadShed::new(1);
        let _first = shed.try_acquire().unwrap();
        let err = shed.try_acquire().unwrap_err();
        assert_eq!(err.kind, ember_core::ErrorKind::Busy);
    }

    #[test]
    fn load_shed_releases_permit_on_drop() {
        let shed = WriteLoadShed::new(1);
        {
            let _permit = shed.try_acquire().unwrap();
        }
        assert!(shed.try_acquire().is_ok());
    }
}
