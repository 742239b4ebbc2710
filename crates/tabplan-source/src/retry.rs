use std::io;
use std::path::Path;
use std::time::Duration;

use backon::{BlockingRetryable, ExponentialBuilder};

/// Bounded exponential backoff for transient backing-store failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryConfig {
    /// Retries after the first attempt; `0` disables retrying.
    pub max_retries: usize,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            min_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryConfig {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_retries)
    }
}

/// I/O error kinds worth retrying. Everything else fails immediately.
pub fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted
            | io::ErrorKind::TimedOut
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
    )
}

/// Run `op`, retrying transient failures according to `config`.
pub(crate) fn with_retry<T>(
    config: &RetryConfig,
    action: &'static str,
    path: &Path,
    op: impl FnMut() -> io::Result<T>,
) -> io::Result<T> {
    op.retry(config.backoff())
        .sleep(std::thread::sleep)
        .when(is_transient)
        .notify(|err, dur| {
            log::warn!(
                "{action} {} failed ({err}); retrying in {:.2}s",
                path.display(),
                dur.as_secs_f32()
            );
        })
        .call()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn fast(max_retries: usize) -> RetryConfig {
        RetryConfig {
            max_retries,
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    #[test]
    fn transient_errors_are_retried_until_success() {
        let calls = Cell::new(0);
        let out = with_retry(&fast(3), "list", Path::new("data"), || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(io::Error::new(io::ErrorKind::TimedOut, "slow store"))
            } else {
                Ok(42)
            }
        })
        .expect("third attempt succeeds");
        assert_eq!(out, 42);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn permanent_errors_are_not_retried() {
        let calls = Cell::new(0);
        let err = with_retry(&fast(3), "open", Path::new("x.parquet"), || -> io::Result<()> {
            calls.set(calls.get() + 1);
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"))
        })
        .expect_err("permission errors surface");
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn retries_are_bounded() {
        let calls = Cell::new(0);
        let _ = with_retry(&fast(2), "open", Path::new("x.parquet"), || -> io::Result<()> {
            calls.set(calls.get() + 1);
            Err(io::Error::new(io::ErrorKind::Interrupted, "again"))
        });
        assert_eq!(calls.get(), 3);
    }
}
