//! Offloading synchronous work from async callers.

use crate::error::{RagError, Result};

/// Run `f` on the blocking thread pool.
///
/// SQLite queries, vector scans and model inference go through here so the
/// calling task yields while they run. A caller racing the returned future
/// against a deadline can give up on it; the work itself still runs to
/// completion in the background.
pub async fn run_blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| RagError::internal(format!("Blocking task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_returns_closure_result() {
        assert_eq!(run_blocking(|| Ok(21 * 2)).await.unwrap(), 42);

        let err = run_blocking(|| -> Result<()> { Err(RagError::database("locked")) })
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "DATABASE_ERROR");
    }

    #[tokio::test]
    async fn test_panic_becomes_internal_error() {
        let err = run_blocking(|| -> Result<()> { panic!("boom") })
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "INTERNAL_ERROR");
    }

    #[tokio::test]
    async fn test_yields_to_deadline() {
        let slow = run_blocking(|| {
            std::thread::sleep(Duration::from_millis(200));
            Ok(())
        });

        let result = tokio::time::timeout(Duration::from_millis(10), slow).await;
        assert!(result.is_err());
    }
}
