/// Timeout wrapper for async operations
///
/// Outbound calls inherit the transport timeout unless a [`TimeoutConfig`]
/// sets an explicit limit.
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

#[derive(Debug, Clone, Default)]
pub struct TimeoutConfig {
    /// `None` leaves the call unbounded at this layer
    pub duration: Option<Duration>,
}

impl TimeoutConfig {
    pub fn from_secs(secs: Option<u64>) -> Self {
        Self {
            duration: secs.map(Duration::from_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeoutError<E> {
    #[error("Operation timed out after {0:?}")]
    Elapsed(Duration),
    #[error("Operation failed: {0}")]
    OperationFailed(E),
}

/// Execute a fallible future, bounded only when `config` carries a duration
pub async fn with_timeout_result<F, T, E>(
    config: &TimeoutConfig,
    future: F,
) -> Result<T, TimeoutError<E>>
where
    F: Future<Output = Result<T, E>>,
{
    let Some(duration) = config.duration else {
        return future.await.map_err(TimeoutError::OperationFailed);
    };

    match timeout(duration, future).await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(e)) => Err(TimeoutError::OperationFailed(e)),
        Err(_) => Err(TimeoutError::Elapsed(duration)),
    }
}
