//! Polling waits for files Upstart creates asynchronously

use std::path::Path;
use std::time::Duration;
use tokio::time::{sleep, Instant};

pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Wait for `path` to exist.
///
/// Returns true if the file appeared within `timeout`.
pub async fn wait_for_file(path: &Path, timeout: Duration) -> bool {
    let until = Instant::now() + timeout;

    while Instant::now() < until {
        if path.exists() {
            return true;
        }
        sleep(POLL_INTERVAL).await;
    }

    log::debug!("{} did not appear within {:?}", path.display(), timeout);
    false
}
