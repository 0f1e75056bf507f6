//! Polling assertions for state reached through background tasks.

use std::time::Duration;

use tokio::time::{Instant, sleep};

const DEFAULT_WAIT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Poll `check` until it holds or five seconds pass.
pub async fn eventually(check: impl FnMut() -> bool) -> bool {
    eventually_within(DEFAULT_WAIT, check).await
}

/// Poll `check` until it holds or `limit` passes.
pub async fn eventually_within(limit: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    loop {
        if check() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(POLL_INTERVAL).await;
    }
}
