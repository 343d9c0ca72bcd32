//! Bounded waits on helper processes (`mail`, `docker`).

use std::io;
use std::process::{Child, ExitStatus};
use std::time::{Duration, Instant};

const POLL_STEP: Duration = Duration::from_millis(20);

/// Waits at most `timeout` for `child` to exit. A child still running at the
/// deadline is killed and reaped, and `Ok(None)` is returned.
pub(crate) fn wait_bounded(
    child: &mut Child,
    timeout: Duration,
) -> io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        let now = Instant::now();
        if now >= deadline {
            reap(child);
            return Ok(None);
        }
        std::thread::sleep(POLL_STEP.min(deadline - now));
    }
}

/// Kills and reaps a child whose result is no longer wanted.
pub(crate) fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn hung_child_is_killed_at_deadline() {
        let mut child = Command::new("sleep").arg("10").spawn().expect("spawn sleep");
        let started = Instant::now();
        let status = wait_bounded(&mut child, Duration::from_millis(200)).expect("wait");
        assert!(status.is_none());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(matches!(child.try_wait(), Ok(Some(_))), "killed child is reaped");
    }

    #[test]
    fn quick_child_reports_status() {
        let mut child = Command::new("true").spawn().expect("spawn true");
        let status = wait_bounded(&mut child, Duration::from_secs(5)).expect("wait");
        assert!(status.map(|s| s.success()).unwrap_or(false));
    }
}
