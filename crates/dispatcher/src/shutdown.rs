use std::time::Duration;

use tokio::sync::watch;

/// Sleeps for `period` unless shutdown is requested first.
///
/// Returns true if the loop should stop. A dropped sender counts as a
/// shutdown request.
pub async fn sleep_or_shutdown(shutdown: &mut watch::Receiver<bool>, period: Duration) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        () = tokio::time::sleep(period) => *shutdown.borrow(),
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}
