//! Lock-based sharing of one session's manager across tasks.
//!
//! Concurrency model: appends and block mutations take the write half of
//! an async `RwLock` (one writer at a time, strict ordering per session);
//! reads share the read half and run concurrently. Waiting is explicit:
//! the `*_timeout` variants surface a typed error instead of blocking
//! indefinitely.

use std::sync::Arc;
use std::time::Duration;

use engram_types::Turn;
use tokio::sync::RwLock;

use crate::assemble::AssembledContext;
use crate::block::MemoryBlock;
use crate::error::MemoryError;
use crate::manager::{FlushReport, MemoryManager, PinnedContent};
use crate::usage::ContextUsage;

/// Cloneable handle to a session's [`MemoryManager`].
#[derive(Debug, Clone)]
pub struct SharedSession {
    manager: Arc<RwLock<MemoryManager>>,
}

impl SharedSession {
    #[must_use]
    pub fn new(manager: MemoryManager) -> Self {
        Self {
            manager: Arc::new(RwLock::new(manager)),
        }
    }

    /// Append a turn, waiting for write access as long as it takes.
    pub async fn append(&self, turn: Turn) -> Result<FlushReport, MemoryError> {
        self.manager.write().await.append(turn).await
    }

    /// Append a turn, waiting at most `wait` for write access.
    pub async fn append_timeout(
        &self,
        turn: Turn,
        wait: Duration,
    ) -> Result<FlushReport, MemoryError> {
        match tokio::time::timeout(wait, self.manager.write()).await {
            Ok(mut manager) => manager.append(turn).await,
            Err(_) => Err(MemoryError::WriteLockTimeout { waited: wait }),
        }
    }

    /// Assemble the context under a shared read lock; concurrent readers
    /// do not serialize against each other.
    pub async fn read(&self) -> Result<AssembledContext, MemoryError> {
        self.manager.read().await.read().await
    }

    pub async fn insert(&self, content: impl Into<String>) {
        self.manager.write().await.insert(content);
    }

    pub async fn clear_insert(&self) {
        self.manager.write().await.clear_insert();
    }

    pub async fn add_block(&self, block: MemoryBlock) -> Result<(), MemoryError> {
        self.manager.write().await.add_block(block)
    }

    pub async fn remove_block(&self, name: &str) -> bool {
        self.manager.write().await.remove_block(name)
    }

    pub async fn pin(
        &self,
        name: impl Into<String>,
        priority: i32,
        content: PinnedContent,
        cap: Option<u32>,
    ) -> Result<(), MemoryError> {
        self.manager.write().await.pin(name, priority, content, cap)
    }

    pub async fn unpin(&self, name: &str) -> bool {
        self.manager.write().await.unpin(name)
    }

    pub async fn usage(&self) -> ContextUsage {
        self.manager.read().await.usage()
    }
}

#[cfg(test)]
mod tests {
    use super::SharedSession;
    use crate::error::MemoryError;
    use crate::estimator::TokenEstimator;
    use crate::manager::{MemoryConfig, MemoryManager};
    use crate::store::InMemoryMessageStore;
    use engram_types::{SessionId, Turn};
    use std::time::Duration;

    struct ByteEstimator;

    impl TokenEstimator for ByteEstimator {
        fn estimate_str(&self, text: &str) -> u32 {
            text.len() as u32
        }
    }

    fn shared() -> SharedSession {
        let manager = MemoryManager::new(
            SessionId::new("shared"),
            MemoryConfig::new(10_000),
            Box::new(ByteEstimator),
            Box::new(InMemoryMessageStore::new()),
        )
        .expect("manager");
        SharedSession::new(manager)
    }

    fn turn(text: &str) -> Turn {
        Turn::try_user(text).expect("non-empty")
    }

    #[tokio::test]
    async fn appends_from_clones_are_strictly_ordered() {
        let session = shared();
        let other = session.clone();

        session.append(turn("first")).await.expect("append");
        other.append(turn("second")).await.expect("append");

        let ctx = session.read().await.expect("read");
        assert_eq!(ctx.entries()[0].text, "first");
        assert_eq!(ctx.entries()[1].text, "second");
    }

    #[tokio::test]
    async fn concurrent_reads_see_the_same_context() {
        let session = shared();
        session.append(turn("hello")).await.expect("append");

        let (a, b) = tokio::join!(session.read(), session.read());
        assert_eq!(a.expect("read"), b.expect("read"));
    }

    #[tokio::test(start_paused = true)]
    async fn append_times_out_while_a_reader_holds_the_lock() {
        let session = shared();
        let _guard = session.manager.read().await;

        let result = session
            .append_timeout(turn("blocked"), Duration::from_millis(50))
            .await;
        assert!(matches!(
            result,
            Err(MemoryError::WriteLockTimeout { waited }) if waited == Duration::from_millis(50)
        ));
    }

    #[tokio::test]
    async fn append_proceeds_once_the_lock_frees_up() {
        let session = shared();
        {
            let _guard = session.manager.read().await;
        }

        session
            .append_timeout(turn("unblocked"), Duration::from_millis(50))
            .await
            .expect("append");
        assert_eq!(session.usage().await.queue_tokens, 17);
    }
}
