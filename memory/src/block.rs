//! Memory blocks - named units of persistent context.
//!
//! A block is distinct from the live conversation queue: it survives
//! flushes and is projected into every assembled context. Variants are a
//! tagged enum rather than a trait hierarchy; callers match on kind only
//! where behavior genuinely differs (truncation support, absorption).

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::SystemTime;

use engram_types::NonEmptyString;

use crate::capability::{ContextSource, Summarizer};
use crate::error::CapabilityError;
use crate::estimator::TokenEstimator;

/// The content strategy of a block.
pub enum BlockKind {
    /// Fixed pinned content, replaced only wholesale via `write`.
    Static { content: NonEmptyString },
    /// Content fetched from a capability at render time. The fetch is the
    /// suspension point; its result is never cached as content.
    Dynamic { source: Arc<dyn ContextSource> },
    /// A running summary that absorbs turns flushed out of the live queue.
    /// Empty until the first absorption.
    Summary {
        summarizer: Arc<dyn Summarizer>,
        content: Option<NonEmptyString>,
    },
}

impl std::fmt::Debug for BlockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockKind::Static { content } => f
                .debug_struct("Static")
                .field("len", &content.as_str().len())
                .finish(),
            BlockKind::Dynamic { .. } => f.debug_struct("Dynamic").finish_non_exhaustive(),
            BlockKind::Summary { content, .. } => f
                .debug_struct("Summary")
                .field("populated", &content.is_some())
                .finish_non_exhaustive(),
        }
    }
}

/// A named, prioritized unit of persistent context.
///
/// Invariants (enforced by the manager): names are unique per manager; a
/// block with no token cap is never truncated, only evicted wholesale.
#[derive(Debug)]
pub struct MemoryBlock {
    name: String,
    priority: i32,
    token_cap: Option<u32>,
    kind: BlockKind,
    last_modified: SystemTime,
    /// Cached token estimate used for budget accounting. For dynamic
    /// blocks this is the last rendered size (0 before the first render),
    /// refreshed from `read()` without treating it as stored state.
    token_estimate: AtomicU32,
}

impl MemoryBlock {
    #[must_use]
    pub fn new_static(name: impl Into<String>, priority: i32, content: NonEmptyString) -> Self {
        Self {
            name: name.into(),
            priority,
            token_cap: None,
            kind: BlockKind::Static { content },
            last_modified: SystemTime::now(),
            token_estimate: AtomicU32::new(0),
        }
    }

    #[must_use]
    pub fn new_dynamic(
        name: impl Into<String>,
        priority: i32,
        source: Arc<dyn ContextSource>,
    ) -> Self {
        Self {
            name: name.into(),
            priority,
            token_cap: None,
            kind: BlockKind::Dynamic { source },
            last_modified: SystemTime::now(),
            token_estimate: AtomicU32::new(0),
        }
    }

    #[must_use]
    pub fn new_summary(
        name: impl Into<String>,
        priority: i32,
        summarizer: Arc<dyn Summarizer>,
    ) -> Self {
        Self {
            name: name.into(),
            priority,
            token_cap: None,
            kind: BlockKind::Summary {
                summarizer,
                content: None,
            },
            last_modified: SystemTime::now(),
            token_estimate: AtomicU32::new(0),
        }
    }

    #[must_use]
    pub fn with_token_cap(mut self, cap: u32) -> Self {
        self.token_cap = Some(cap);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn priority(&self) -> i32 {
        self.priority
    }

    #[must_use]
    pub fn token_cap(&self) -> Option<u32> {
        self.token_cap
    }

    #[must_use]
    pub fn last_modified(&self) -> SystemTime {
        self.last_modified
    }

    #[must_use]
    pub fn kind(&self) -> &BlockKind {
        &self.kind
    }

    #[must_use]
    pub fn is_summary(&self) -> bool {
        matches!(self.kind, BlockKind::Summary { .. })
    }

    #[must_use]
    pub fn summarizer(&self) -> Option<Arc<dyn Summarizer>> {
        match &self.kind {
            BlockKind::Summary { summarizer, .. } => Some(Arc::clone(summarizer)),
            BlockKind::Static { .. } | BlockKind::Dynamic { .. } => None,
        }
    }

    #[must_use]
    pub fn summary_text(&self) -> Option<&str> {
        match &self.kind {
            BlockKind::Summary { content, .. } => content.as_ref().map(NonEmptyString::as_str),
            BlockKind::Static { .. } | BlockKind::Dynamic { .. } => None,
        }
    }

    #[must_use]
    pub fn token_estimate(&self) -> u32 {
        self.token_estimate.load(Ordering::Relaxed)
    }

    pub(crate) fn set_token_estimate(&self, tokens: u32) {
        self.token_estimate.store(tokens, Ordering::Relaxed);
    }

    /// Capped blocks can be cut down in place; uncapped blocks are
    /// immutable with respect to size and must be evicted wholesale.
    /// Dynamic content lives behind the capability and is never local.
    #[must_use]
    pub fn supports_truncate(&self) -> bool {
        self.token_cap.is_some() && !matches!(self.kind, BlockKind::Dynamic { .. })
    }

    /// Materialize the block's current content.
    ///
    /// `Ok(None)` means the block renders to nothing (a summary that has
    /// absorbed nothing yet). Dynamic fetches surface their typed error.
    pub async fn render(&self) -> Result<Option<String>, CapabilityError> {
        match &self.kind {
            BlockKind::Static { content } => Ok(Some(content.as_str().to_string())),
            BlockKind::Summary { content, .. } => {
                Ok(content.as_ref().map(|c| c.as_str().to_string()))
            }
            BlockKind::Dynamic { source } => source.fetch().await.map(Some),
        }
    }

    /// Replace the block's content wholesale.
    ///
    /// Returns false for dynamic blocks, whose content lives behind the
    /// capability; nothing is mutated in that case.
    pub fn write(&mut self, content: NonEmptyString) -> bool {
        match &mut self.kind {
            BlockKind::Static { content: existing } => {
                *existing = content;
            }
            BlockKind::Summary {
                content: existing, ..
            } => {
                *existing = Some(content);
            }
            BlockKind::Dynamic { .. } => {
                tracing::debug!(block = %self.name, "ignoring write to dynamic block");
                return false;
            }
        }
        self.last_modified = SystemTime::now();
        true
    }

    /// Cut local content down so its estimate fits `target_tokens`.
    ///
    /// Returns false when the block does not support truncation or when
    /// nothing would remain (the caller then evicts wholesale).
    pub fn truncate(&mut self, target_tokens: u32, estimator: &dyn TokenEstimator) -> bool {
        if !self.supports_truncate() {
            return false;
        }

        let text = match &self.kind {
            BlockKind::Static { content } => content.as_str().to_string(),
            BlockKind::Summary { content, .. } => match content {
                Some(c) => c.as_str().to_string(),
                None => return false,
            },
            BlockKind::Dynamic { .. } => return false,
        };

        if estimator.estimate_str(&text) <= target_tokens {
            self.set_token_estimate(estimator.estimate_str(&text));
            return true;
        }

        let chars: Vec<char> = text.chars().collect();
        let mut lo = 0usize;
        let mut hi = chars.len();
        while lo < hi {
            let mid = (lo + hi).div_ceil(2);
            let prefix: String = chars[..mid].iter().collect();
            if estimator.estimate_str(&prefix) <= target_tokens {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }

        let truncated: String = chars[..lo].iter().collect();
        let Ok(content) = NonEmptyString::new(truncated) else {
            return false;
        };

        let tokens = estimator.estimate_str(content.as_str());
        if !self.write(content) {
            return false;
        }
        self.set_token_estimate(tokens);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::{BlockKind, MemoryBlock};
    use crate::capability::{ContextSource, Summarizer};
    use crate::error::CapabilityError;
    use crate::estimator::TokenEstimator;
    use async_trait::async_trait;
    use engram_types::{NonEmptyString, Turn};
    use std::sync::Arc;

    struct FailingSource;

    #[async_trait]
    impl ContextSource for FailingSource {
        async fn fetch(&self) -> Result<String, CapabilityError> {
            Err(CapabilityError::Failed("index offline".to_string()))
        }
    }

    struct EchoSummarizer;

    #[async_trait]
    impl Summarizer for EchoSummarizer {
        async fn absorb(
            &self,
            _prior: Option<&str>,
            turns: &[Turn],
        ) -> Result<String, CapabilityError> {
            Ok(format!("{} turns", turns.len()))
        }
    }

    /// One token per byte; deterministic for truncation math.
    struct ByteEstimator;

    impl TokenEstimator for ByteEstimator {
        fn estimate_str(&self, text: &str) -> u32 {
            text.len() as u32
        }
    }

    fn text(s: &str) -> NonEmptyString {
        NonEmptyString::new(s).expect("non-empty")
    }

    #[tokio::test]
    async fn static_block_renders_fixed_content() {
        let block = MemoryBlock::new_static("pin", 0, text("pinned"));
        let rendered = block.render().await.expect("render");
        assert_eq!(rendered.as_deref(), Some("pinned"));
    }

    #[tokio::test]
    async fn empty_summary_renders_nothing() {
        let block = MemoryBlock::new_summary("recap", 0, Arc::new(EchoSummarizer));
        assert_eq!(block.render().await.expect("render"), None);
    }

    #[tokio::test]
    async fn dynamic_failure_propagates() {
        let block = MemoryBlock::new_dynamic("facts", 0, Arc::new(FailingSource));
        let result = block.render().await;
        assert!(matches!(result, Err(CapabilityError::Failed(_))));
    }

    #[test]
    fn write_replaces_wholesale() {
        let mut block = MemoryBlock::new_static("pin", 0, text("old"));
        assert!(block.write(text("new")));
        match block.kind() {
            BlockKind::Static { content } => assert_eq!(content.as_str(), "new"),
            _ => panic!("expected static"),
        }
    }

    #[test]
    fn write_to_dynamic_is_refused() {
        let mut block = MemoryBlock::new_dynamic("facts", 0, Arc::new(FailingSource));
        assert!(!block.write(text("nope")));
    }

    #[test]
    fn uncapped_block_refuses_truncate() {
        let mut block = MemoryBlock::new_static("pin", 0, text("0123456789"));
        assert!(!block.supports_truncate());
        assert!(!block.truncate(4, &ByteEstimator));
    }

    #[test]
    fn capped_block_truncates_to_target() {
        let mut block = MemoryBlock::new_static("pin", 0, text("0123456789")).with_token_cap(10);
        assert!(block.truncate(4, &ByteEstimator));
        match block.kind() {
            BlockKind::Static { content } => assert_eq!(content.as_str(), "0123"),
            _ => panic!("expected static"),
        }
        assert_eq!(block.token_estimate(), 4);
    }

    #[test]
    fn truncate_to_nothing_reports_failure() {
        let mut block = MemoryBlock::new_static("pin", 0, text("0123456789")).with_token_cap(10);
        assert!(!block.truncate(0, &ByteEstimator));
    }
}
