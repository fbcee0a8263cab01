//! Pacing clock: the two timing primitives ISO-TP needs.
//!
//! Sessions never call a timer API directly. [`PacingClock`] models just "wait N" (STmin pacing,
//! the Flow Control guard delay) and "wait up to T for an event" (N_Bs, N_Cr, transfer bounds).

use core::future::Future;
use core::time::Duration;

/// Timeout marker returned by [`PacingClock::timeout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedOut;

/// Minimal time source: sleeping and applying timeouts to futures.
pub trait PacingClock: Clone + Send + Sync + 'static {
    /// Sleep for a duration.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;

    /// Run `future`, giving up with [`TimedOut`] if it doesn't complete within `duration`.
    fn timeout<F>(
        &self,
        duration: Duration,
        future: F,
    ) -> impl Future<Output = Result<F::Output, TimedOut>> + Send
    where
        F: Future + Send;
}

/// [`PacingClock`] backed by `tokio::time`.
///
/// Under `#[tokio::test(start_paused = true)]` this follows tokio's virtual clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioClock;

impl PacingClock for TokioClock {
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn timeout<F>(
        &self,
        duration: Duration,
        future: F,
    ) -> impl Future<Output = Result<F::Output, TimedOut>> + Send
    where
        F: Future + Send,
    {
        async move {
            tokio::time::timeout(duration, future)
                .await
                .map_err(|_| TimedOut)
        }
    }
}
