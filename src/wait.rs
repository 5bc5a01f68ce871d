use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

/// Why a wait ended without the condition holding.
#[derive(Debug)]
pub enum WaitError<E> {
    TimedOut { waited: Duration, attempts: u32 },
    Failed(E),
}

/// Poll `probe` until it yields `Some`, an error, or `timeout` elapses.
///
/// The probe always runs at least once, so a zero timeout is a single check.
/// `Ok(None)` means "not yet"; `Err` aborts the wait immediately.
pub async fn await_condition<T, E, F, Fut>(
    mut probe: F,
    timeout: Duration,
    poll: Duration,
) -> Result<T, WaitError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let start = Instant::now();
    let deadline = start + timeout;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        match probe().await {
            Ok(Some(v)) => {
                debug!(attempts, elapsed_ms = start.elapsed().as_millis() as u64, "condition met");
                return Ok(v);
            }
            Ok(None) => {}
            Err(e) => return Err(WaitError::Failed(e)),
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(WaitError::TimedOut {
                waited: now - start,
                attempts,
            });
        }
        tokio::time::sleep(poll.min(deadline - now)).await;
    }
}
