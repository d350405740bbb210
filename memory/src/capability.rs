//! Capability seams consumed by the memory core.
//!
//! These are the only suspension points in the crate. Each call either
//! completes, fails with a typed [`CapabilityError`], or is bounded by a
//! caller-supplied deadline via [`fetch_with_timeout`], never a silent
//! partial result.

use std::time::Duration;

use async_trait::async_trait;

use engram_types::Turn;

use crate::assemble::ContextEntry;
use crate::error::CapabilityError;

/// Produces the current content of a dynamic memory block, e.g. by querying
/// a retrieval index. May be long-latency.
#[async_trait]
pub trait ContextSource: Send + Sync {
    async fn fetch(&self) -> Result<String, CapabilityError>;
}

/// Folds flushed turns into a running summary.
///
/// `prior` is the existing summary, if any; the returned string replaces it
/// wholesale.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn absorb(&self, prior: Option<&str>, turns: &[Turn])
    -> Result<String, CapabilityError>;
}

/// The opaque text-completion service the assembled context is handed to.
///
/// The core never calls this itself; it is the consumed interface of the
/// enclosing application. Rate limits and transport failures are the
/// caller's concern.
#[async_trait]
pub trait ModelService: Send + Sync {
    async fn complete(&self, context: &[ContextEntry]) -> Result<String, CapabilityError>;
}

/// Bound a dynamic fetch with an explicit deadline.
pub async fn fetch_with_timeout(
    source: &dyn ContextSource,
    deadline: Duration,
) -> Result<String, CapabilityError> {
    match tokio::time::timeout(deadline, source.fetch()).await {
        Ok(result) => result,
        Err(_) => Err(CapabilityError::Timeout(deadline)),
    }
}

#[cfg(test)]
mod tests {
    use super::{CapabilityError, ContextSource, fetch_with_timeout};
    use async_trait::async_trait;
    use std::time::Duration;

    struct SlowSource;

    #[async_trait]
    impl ContextSource for SlowSource {
        async fn fetch(&self) -> Result<String, CapabilityError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("too late".to_string())
        }
    }

    struct InstantSource;

    #[async_trait]
    impl ContextSource for InstantSource {
        async fn fetch(&self) -> Result<String, CapabilityError> {
            Ok("ready".to_string())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_surfaces_typed_timeout() {
        let result = fetch_with_timeout(&SlowSource, Duration::from_millis(50)).await;
        assert!(matches!(result, Err(CapabilityError::Timeout(_))));
    }

    #[tokio::test]
    async fn fast_fetch_passes_through() {
        let content = fetch_with_timeout(&InstantSource, Duration::from_secs(1))
            .await
            .expect("fetch");
        assert_eq!(content, "ready");
    }
}
