use std::future::Future;
use std::time::Duration;

use log::debug;
use tokio_util::sync::CancellationToken;

use crate::error::UpdateError;

/// Run `future`, turning an elapsed `timeout` into a network failure.
pub(crate) async fn run_with_timeout<T, F>(
    timeout: Duration,
    operation: &'static str,
    future: F,
) -> Result<T, UpdateError>
where
    F: Future<Output = Result<T, UpdateError>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(UpdateError::network(
            operation,
            format!("timed out after {}s", timeout.as_secs()),
        )),
    }
}

/// Retry `operation` on retryable errors, sleeping for each delay before the
/// corresponding attempt. Structural errors return immediately. Cancellation
/// interrupts both the sleeps and the running attempt.
pub(crate) async fn retry_with_delays<T, Op, Fut>(
    operation_name: &'static str,
    retry_delays: &[Duration],
    cancel: &CancellationToken,
    mut operation: Op,
) -> Result<T, UpdateError>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, UpdateError>>,
{
    let attempts = retry_delays.len().max(1);
    let mut last_err = None;

    for attempt in 0..attempts {
        let delay = retry_delays.get(attempt).copied().unwrap_or_default();
        if cancel.is_cancelled() {
            return Err(UpdateError::cancelled(operation_name));
        }

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(UpdateError::cancelled(operation_name)),
            result = async {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                operation().await
            } => result,
        };

        match result {
            Ok(value) => return Ok(value),
            Err(error) if error.is_retryable() && attempt + 1 < attempts => {
                debug!(
                    "{} attempt {} failed: {}",
                    operation_name,
                    attempt + 1,
                    error
                );
                last_err = Some(error);
            }
            Err(error) => return Err(error),
        }
    }

    Err(last_err.unwrap_or_else(|| UpdateError::cancelled(operation_name)))
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use super::{retry_with_delays, run_with_timeout};
    use crate::error::{ErrorKind, UpdateError};

    const NO_DELAYS: [Duration; 3] = [Duration::ZERO; 3];

    #[tokio::test]
    async fn run_with_timeout_passes_results_through() {
        let value = run_with_timeout(Duration::from_secs(1), "query", async {
            Ok::<_, UpdateError>(42)
        })
        .await
        .expect("success result should pass through");
        assert_eq!(value, 42);
    }

    #[tokio::test(start_paused = true)]
    async fn run_with_timeout_reports_network_failure() {
        let error = run_with_timeout(Duration::from_secs(5), "query", async {
            tokio::time::sleep(Duration::from_secs(20)).await;
            Ok::<_, UpdateError>(())
        })
        .await
        .expect_err("slow future should time out");
        assert_eq!(error.kind(), ErrorKind::NetworkUnavailable);
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_for_op = Arc::clone(&attempts);

        let result = retry_with_delays("query", &NO_DELAYS, &CancellationToken::new(), move || {
            let attempts = Arc::clone(&attempts_for_op);
            async move {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(UpdateError::network("query", "offline"))
                } else {
                    Ok("ok")
                }
            }
        })
        .await
        .expect("second attempt should succeed");

        assert_eq!(result, "ok");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn structural_errors_are_not_retried() {
        let attempts = AtomicUsize::new(0);

        let error = retry_with_delays("query", &NO_DELAYS, &CancellationToken::new(), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(UpdateError::malformed("bad tag")) }
        })
        .await
        .expect_err("malformed release is fatal");

        assert_eq!(error.kind(), ErrorKind::MalformedRelease);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_return_last_error() {
        let attempts = AtomicUsize::new(0);

        let error = retry_with_delays("query", &NO_DELAYS, &CancellationToken::new(), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(UpdateError::network("query", "still offline")) }
        })
        .await
        .expect_err("all attempts fail");

        assert_eq!(error.kind(), ErrorKind::NetworkUnavailable);
        assert_eq!(attempts.load(Ordering::SeqCst), NO_DELAYS.len());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let cancel = CancellationToken::new();
        let cancel_from_op = cancel.clone();

        let error = retry_with_delays(
            "query",
            &[Duration::ZERO, Duration::from_secs(60)],
            &cancel,
            || {
                cancel_from_op.cancel();
                async { Err::<(), _>(UpdateError::network("query", "offline")) }
            },
        )
        .await
        .expect_err("cancelled retry should stop");

        assert_eq!(error.kind(), ErrorKind::Cancelled);
    }
}
