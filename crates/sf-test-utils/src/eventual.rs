//! Polling helpers for state reached asynchronously.
//!
//! Background tasks (pull-peer handshakes, relay supervisors, watchdogs)
//! finish at some point after the call that started them. Tests poll for the
//! expected state with a short backoff instead of sleeping a fixed time.

use std::future::Future;
use std::time::Duration;

const INITIAL_DELAY: Duration = Duration::from_millis(10);
const MAX_DELAY: Duration = Duration::from_millis(200);

/// Default deadline for [`assert_eventually`].
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(5);

/// Poll `condition` until it holds or `deadline` elapses.
///
/// # Errors
///
/// Returns a message naming `what` if the deadline elapses first.
pub async fn wait_for<F, Fut>(what: &str, deadline: Duration, mut condition: F) -> Result<(), String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let started = tokio::time::Instant::now();
    let mut delay = INITIAL_DELAY;

    loop {
        if condition().await {
            return Ok(());
        }
        if started.elapsed() >= deadline {
            return Err(format!("{what}: not reached within {deadline:?}"));
        }
        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(MAX_DELAY);
    }
}

/// Panic unless `condition` holds within [`DEFAULT_DEADLINE`].
pub async fn assert_eventually<F, Fut>(what: &str, condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    if let Err(message) = wait_for(what, DEFAULT_DEADLINE, condition).await {
        panic!("{message}");
    }
}
