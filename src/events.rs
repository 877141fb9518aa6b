//! Event system for run lifecycle hooks.
//!
//! Provides an optional, non-intrusive way to observe a run. The runner and
//! feedback-consuming schedulers emit events as attempts execute, intervals
//! shift, and admission decisions land. Users can implement [`EventHandler`]
//! to receive these events for logging, progress output, or metrics; the
//! built-in Prometheus recorder is one such handler.

use std::sync::Arc;
use std::time::Duration;

/// Events emitted during a run.
#[derive(Debug, Clone)]
pub enum Event {
    /// An attempt is about to execute.
    AttemptStart {
        /// 1-based attempt ordinal.
        attempt: u64,
    },
    /// An attempt has finished and been classified.
    AttemptEnd {
        /// 1-based attempt ordinal.
        attempt: u64,
        /// The pattern matcher's verdict.
        success: bool,
        /// Wall time of the attempt.
        duration: Duration,
        /// Process exit code.
        exit_code: i32,
    },
    /// A scheduler changed its current interval (adaptive disciplines).
    IntervalChanged {
        /// The new interval.
        interval: Duration,
    },
    /// The circuit breaker moved between states.
    CircuitTransition {
        /// State being left (e.g. `"closed"`).
        from: &'static str,
        /// State being entered (e.g. `"open"`).
        to: &'static str,
    },
    /// The rate limiter admitted or denied a request slot.
    RateLimitDecision {
        /// Whether the request was admitted.
        allowed: bool,
    },
}

/// Handler for run lifecycle events.
///
/// Implement this trait to receive attempt outcomes, interval changes, and
/// admission decisions as they happen.
///
/// This is entirely optional -- the runner works without an event handler.
///
/// # Example
///
/// ```
/// use repeater::events::{Event, EventHandler};
///
/// struct PrintHandler;
///
/// impl EventHandler for PrintHandler {
///     fn on_event(&self, event: Event) {
///         if let Event::AttemptEnd { attempt, success, .. } = event {
///             println!("attempt {} ok={}", attempt, success);
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    /// Called when the runner or a scheduler emits an event.
    fn on_event(&self, event: Event);
}

/// Emit an event if a handler is present. No-op otherwise.
pub(crate) fn emit(handler: &Option<Arc<dyn EventHandler>>, event: Event) {
    if let Some(ref h) = handler {
        h.on_event(event);
    }
}

/// An [`EventHandler`] backed by a closure.
///
/// # Example
///
/// ```
/// use repeater::events::{Event, FnEventHandler};
/// use std::sync::Arc;
///
/// let handler = Arc::new(FnEventHandler(|event: Event| {
///     if let Event::RateLimitDecision { allowed } = event {
///         println!("allowed={}", allowed);
///     }
/// }));
/// ```
pub struct FnEventHandler<F: Fn(Event) + Send + Sync>(pub F);

impl<F: Fn(Event) + Send + Sync> EventHandler for FnEventHandler<F> {
    fn on_event(&self, event: Event) {
        (self.0)(event);
    }
}
