//! Memory manager - orchestrates queue, blocks, budget, and flushing.
//!
//! One manager instance owns one session's memory: the live turn queue,
//! the block set, and the token budget. There is no process-wide registry;
//! construction is explicit and fully configured.

use std::collections::VecDeque;

use engram_types::{ContentPart, NonEmptyString, SessionId, Turn, TurnSeq};

use crate::assemble::{AssembledContext, InsertMode, RenderedBlock, assemble};
use crate::block::{BlockKind, MemoryBlock};
use crate::error::MemoryError;
use crate::estimator::TokenEstimator;
use crate::store::MessageStore;
use crate::usage::ContextUsage;

const DEFAULT_CHAT_HISTORY_RATIO: f32 = 0.7;

/// Configuration for one manager instance, fixed at construction.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    token_limit: u32,
    chat_history_ratio: f32,
    flush_batch_tokens: Option<u32>,
    insert_mode: InsertMode,
}

impl MemoryConfig {
    /// Defaults: ratio 0.7, no per-pass batch cap, separate insert mode.
    #[must_use]
    pub fn new(token_limit: u32) -> Self {
        Self {
            token_limit,
            chat_history_ratio: DEFAULT_CHAT_HISTORY_RATIO,
            flush_batch_tokens: None,
            insert_mode: InsertMode::Separate,
        }
    }

    /// Fraction of the token limit the queue is flushed down to. The ratio
    /// sets the settle target; `flush_batch_tokens` only bounds one pass.
    #[must_use]
    pub fn with_chat_history_ratio(mut self, ratio: f32) -> Self {
        self.chat_history_ratio = ratio;
        self
    }

    /// Cap on tokens removed in a single flush pass. When a pass hits the
    /// cap, settling stops for this mutation and resumes on the next
    /// append, so the queue may sit over the target (or even the limit)
    /// between appends.
    #[must_use]
    pub fn with_flush_batch_tokens(mut self, tokens: u32) -> Self {
        self.flush_batch_tokens = Some(tokens);
        self
    }

    #[must_use]
    pub fn with_insert_mode(mut self, mode: InsertMode) -> Self {
        self.insert_mode = mode;
        self
    }

    #[must_use]
    pub fn token_limit(&self) -> u32 {
        self.token_limit
    }

    #[must_use]
    pub fn chat_history_ratio(&self) -> f32 {
        self.chat_history_ratio
    }

    #[must_use]
    pub fn insert_mode(&self) -> InsertMode {
        self.insert_mode
    }

    fn validate(&self) -> Result<(), MemoryError> {
        if self.token_limit == 0 {
            return Err(MemoryError::InvalidConfig {
                reason: "token_limit must be positive".to_string(),
            });
        }
        if !(self.chat_history_ratio > 0.0 && self.chat_history_ratio <= 1.0) {
            return Err(MemoryError::InvalidConfig {
                reason: format!(
                    "chat_history_ratio must be in (0, 1], got {}",
                    self.chat_history_ratio
                ),
            });
        }
        if self.flush_batch_tokens == Some(0) {
            return Err(MemoryError::InvalidConfig {
                reason: "flush_batch_tokens must be positive when set".to_string(),
            });
        }
        Ok(())
    }
}

/// Already-loaded content handed over for pinning, with its declared kind.
///
/// The core never performs IO; the enclosing application loads files.
#[derive(Debug, Clone)]
pub enum PinnedContent {
    Text(NonEmptyString),
    Image { media_type: String, data: Vec<u8> },
    /// Declared but unhandled; rejected before any state mutation.
    Audio { media_type: String, data: Vec<u8> },
}

/// What one settle pass did to the queue. Dropped turns are never silent:
/// they show up here and in the log.
#[derive(Debug, Clone, Default)]
pub struct FlushReport {
    /// Turns handed to an absorbing block.
    pub absorbed: usize,
    /// Turns dropped because absorption was unavailable or failed.
    pub dropped: usize,
    /// Turns that alone exceeded the entire budget.
    pub forced_drops: usize,
    /// Total estimated tokens removed from the queue.
    pub tokens_removed: u32,
    pub warnings: Vec<String>,
}

impl FlushReport {
    #[must_use]
    pub fn flushed_nothing(&self) -> bool {
        self.tokens_removed == 0
    }
}

#[derive(Debug)]
struct QueuedTurn {
    seq: TurnSeq,
    turn: Turn,
    tokens: u32,
}

struct PassOutcome {
    removed_tokens: u32,
    capped: bool,
}

/// Per-session memory manager.
///
/// Writes take `&mut self`; reads take `&self` and never mutate stored
/// state (budget accounting for dynamic blocks is refreshed through an
/// atomic cache). Wrap in [`SharedSession`](crate::SharedSession) for
/// lock-based sharing.
pub struct MemoryManager {
    session: SessionId,
    config: MemoryConfig,
    estimator: Box<dyn TokenEstimator>,
    store: Box<dyn MessageStore>,
    queue: VecDeque<QueuedTurn>,
    blocks: Vec<MemoryBlock>,
    pending_insert: Option<String>,
}

impl std::fmt::Debug for MemoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryManager")
            .field("session", &self.session)
            .field("config", &self.config)
            .field("queue_len", &self.queue.len())
            .field("blocks", &self.blocks.iter().map(MemoryBlock::name).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl MemoryManager {
    /// Build a manager for one session, reloading any turns the store
    /// already holds for it (restart recovery).
    pub fn new(
        session: SessionId,
        config: MemoryConfig,
        estimator: Box<dyn TokenEstimator>,
        store: Box<dyn MessageStore>,
    ) -> Result<Self, MemoryError> {
        config.validate()?;

        let existing = store.read_all(&session)?;
        let queue = existing
            .into_iter()
            .map(|stored| {
                let tokens = estimator.estimate_turn(&stored.turn);
                QueuedTurn {
                    seq: stored.seq,
                    turn: stored.turn,
                    tokens,
                }
            })
            .collect();

        Ok(Self {
            session,
            config,
            estimator,
            store,
            queue,
            blocks: Vec::new(),
            pending_insert: None,
        })
    }

    #[must_use]
    pub fn session(&self) -> &SessionId {
        &self.session
    }

    #[must_use]
    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn blocks(&self) -> &[MemoryBlock] {
        &self.blocks
    }

    #[must_use]
    pub fn pending_insert(&self) -> Option<&str> {
        self.pending_insert.as_deref()
    }

    fn queue_tokens(&self) -> u32 {
        self.queue.iter().map(|q| q.tokens).sum()
    }

    fn block_tokens(&self) -> u32 {
        self.blocks.iter().map(MemoryBlock::token_estimate).sum()
    }

    fn flush_target(&self) -> u32 {
        (self.config.token_limit as f32 * self.config.chat_history_ratio) as u32
    }

    #[must_use]
    pub fn usage(&self) -> ContextUsage {
        ContextUsage {
            queue_tokens: self.queue_tokens(),
            block_tokens: self.block_tokens(),
            budget_tokens: self.config.token_limit,
        }
    }

    /// Append a turn to the session and settle the budget.
    ///
    /// The turn is persisted first, then the queue flushes until it is
    /// back under the configured target. Dynamic blocks count at their
    /// last rendered size here; appending never suspends on a fetch.
    pub async fn append(&mut self, turn: Turn) -> Result<FlushReport, MemoryError> {
        let tokens = self.estimator.estimate_turn(&turn);
        let seq = self.store.append(&self.session, &turn)?;
        self.queue.push_back(QueuedTurn { seq, turn, tokens });

        self.settle().await
    }

    /// Stage ad-hoc content for the next reads, without touching the
    /// persisted queue. Replaces any previously staged content; placement
    /// follows the construction-time insert mode.
    pub fn insert(&mut self, content: impl Into<String>) {
        self.pending_insert = Some(content.into());
    }

    pub fn clear_insert(&mut self) {
        self.pending_insert = None;
    }

    /// Add a block. Rejected without mutation when the name is taken.
    pub fn add_block(&mut self, block: MemoryBlock) -> Result<(), MemoryError> {
        if self.blocks.iter().any(|b| b.name() == block.name()) {
            return Err(MemoryError::BlockNameConflict {
                name: block.name().to_string(),
            });
        }

        if block.token_estimate() == 0 {
            let estimate = match block.kind() {
                BlockKind::Static { content } => self.estimator.estimate_str(content.as_str()),
                BlockKind::Summary { content, .. } => content
                    .as_ref()
                    .map_or(0, |c| self.estimator.estimate_str(c.as_str())),
                BlockKind::Dynamic { .. } => 0,
            };
            block.set_token_estimate(estimate);
        }

        self.blocks.push(block);
        Ok(())
    }

    /// Remove a block by name. Idempotent: a missing name is a no-op.
    pub fn remove_block(&mut self, name: &str) -> bool {
        match self.blocks.iter().position(|b| b.name() == name) {
            Some(idx) => {
                self.blocks.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Pin already-loaded content as a static block.
    ///
    /// Text is pinned as-is; images are budgeted at their size-derived
    /// cost and projected as a marker entry. Kinds with no handling are
    /// rejected before any state mutation. A capped pin may be truncated
    /// under budget pressure; an uncapped one only evicted wholesale.
    pub fn pin(
        &mut self,
        name: impl Into<String>,
        priority: i32,
        content: PinnedContent,
        cap: Option<u32>,
    ) -> Result<(), MemoryError> {
        let (text, estimate) = match content {
            PinnedContent::Text(text) => {
                let estimate = self.estimator.estimate_str(text.as_str());
                (text, estimate)
            }
            PinnedContent::Image { media_type, data } => {
                let part = ContentPart::image(media_type.clone(), data);
                let estimate = self.estimator.estimate_part(&part);
                let marker = NonEmptyString::new(format!("[image: {media_type}]"))
                    .expect("marker text is never empty");
                (marker, estimate)
            }
            PinnedContent::Audio { .. } => {
                return Err(MemoryError::UnsupportedContentKind {
                    kind: "audio".to_string(),
                });
            }
        };

        let mut block = MemoryBlock::new_static(name, priority, text);
        if let Some(cap) = cap {
            block = block.with_token_cap(cap);
        }
        block.set_token_estimate(estimate);
        self.add_block(block)
    }

    /// Remove a pinned block. Idempotent, like [`remove_block`](Self::remove_block).
    pub fn unpin(&mut self, name: &str) -> bool {
        self.remove_block(name)
    }

    /// Assemble the context for model consumption.
    ///
    /// Pure projection: renders blocks in ascending priority order (ties
    /// by insertion), then merges the queue and any pending insert.
    /// Reading never flushes. A dynamic block failure aborts the whole
    /// call; a partially assembled context is never returned. Dynamic
    /// content may differ between calls - that nondeterminism is
    /// caller-visible by design.
    pub async fn read(&self) -> Result<AssembledContext, MemoryError> {
        let mut order: Vec<usize> = (0..self.blocks.len()).collect();
        order.sort_by_key(|&i| self.blocks[i].priority());

        let mut rendered = Vec::with_capacity(order.len());
        for idx in order {
            let block = &self.blocks[idx];
            match block.render().await {
                Ok(Some(content)) => {
                    if matches!(block.kind(), BlockKind::Dynamic { .. }) {
                        block.set_token_estimate(self.estimator.estimate_str(&content));
                    }
                    rendered.push(RenderedBlock {
                        name: block.name().to_string(),
                        content,
                    });
                }
                Ok(None) => {}
                Err(source) => {
                    return Err(MemoryError::BlockRead {
                        name: block.name().to_string(),
                        source,
                    });
                }
            }
        }

        let queue: Vec<&Turn> = self.queue.iter().map(|q| &q.turn).collect();
        Ok(assemble(
            &rendered,
            &queue,
            self.pending_insert.as_deref(),
            self.config.insert_mode,
        ))
    }

    /// Bring the total back under the token limit.
    ///
    /// The queue is flushed down to the ratio target first; only when the
    /// queue alone fits does block eviction run. Never removes more than
    /// needed, and never loops on an oversized turn.
    async fn settle(&mut self) -> Result<FlushReport, MemoryError> {
        let mut report = FlushReport::default();
        let target = self.flush_target();

        loop {
            let total = self.queue_tokens().saturating_add(self.block_tokens());
            if total <= self.config.token_limit {
                break;
            }

            if self.queue_tokens() > target {
                let outcome = self.flush_pass(target, &mut report).await?;
                if outcome.capped || outcome.removed_tokens == 0 {
                    break;
                }
            } else if !self.evict_blocks(&mut report) {
                return Err(MemoryError::BudgetExceeded {
                    required: total,
                    limit: self.config.token_limit,
                });
            }
        }

        if !report.flushed_nothing() {
            tracing::debug!(
                session = %self.session,
                tokens_removed = report.tokens_removed,
                absorbed = report.absorbed,
                dropped = report.dropped,
                "flush settled"
            );
        }

        Ok(report)
    }

    /// One flush pass: pop oldest turns until the queue reaches `target`
    /// or the batch cap is hit, then hand the batch to the absorbing
    /// block (or drop it, loudly).
    async fn flush_pass(
        &mut self,
        target: u32,
        report: &mut FlushReport,
    ) -> Result<PassOutcome, MemoryError> {
        let mut batch: Vec<QueuedTurn> = Vec::new();
        let mut removed_tokens = 0u32;
        let mut capped = false;

        while self.queue_tokens() > target {
            let Some(front) = self.queue.pop_front() else {
                break;
            };
            if front.tokens > self.config.token_limit {
                report.forced_drops += 1;
                report.warnings.push(format!(
                    "turn {} alone exceeds the token budget ({} > {})",
                    front.seq, front.tokens, self.config.token_limit
                ));
                tracing::warn!(
                    session = %self.session,
                    seq = %front.seq,
                    tokens = front.tokens,
                    limit = self.config.token_limit,
                    "single turn exceeds the entire token budget; forcibly removed"
                );
            }
            removed_tokens = removed_tokens.saturating_add(front.tokens);
            batch.push(front);

            if let Some(cap) = self.config.flush_batch_tokens
                && removed_tokens >= cap
            {
                capped = true;
                break;
            }
        }

        if batch.is_empty() {
            return Ok(PassOutcome {
                removed_tokens: 0,
                capped: false,
            });
        }

        let turns: Vec<Turn> = batch.iter().map(|q| q.turn.clone()).collect();
        self.absorb_or_drop(&turns, report).await;

        self.store.delete_oldest(&self.session, batch.len())?;
        report.tokens_removed = report.tokens_removed.saturating_add(removed_tokens);

        Ok(PassOutcome {
            removed_tokens,
            capped,
        })
    }

    /// Hand flushed turns to the first summary block, or drop them with a
    /// recorded warning. Absorption failures degrade to a drop; they never
    /// abort the flush.
    async fn absorb_or_drop(&mut self, turns: &[Turn], report: &mut FlushReport) {
        let absorber = self.blocks.iter().position(MemoryBlock::is_summary);

        let Some(idx) = absorber else {
            report.dropped += turns.len();
            report
                .warnings
                .push(format!("{} turns dropped with no absorbing block", turns.len()));
            tracing::warn!(
                session = %self.session,
                count = turns.len(),
                "no absorbing block configured; dropping flushed turns"
            );
            return;
        };

        let Some(summarizer) = self.blocks[idx].summarizer() else {
            // is_summary guarantees a summarizer; treat a mismatch as a drop.
            report.dropped += turns.len();
            report.warnings.push("absorbing block has no summarizer".to_string());
            return;
        };

        let prior = self.blocks[idx].summary_text().map(str::to_string);
        match summarizer.absorb(prior.as_deref(), turns).await {
            Ok(summary) => match NonEmptyString::new(summary) {
                Ok(content) => {
                    let tokens = self.estimator.estimate_str(content.as_str());
                    let cap = {
                        let block = &mut self.blocks[idx];
                        block.write(content);
                        block.set_token_estimate(tokens);
                        block.token_cap()
                    };

                    if let Some(cap) = cap
                        && tokens > cap
                        && !self.blocks[idx].truncate(cap, self.estimator.as_ref())
                    {
                        tracing::warn!(
                            session = %self.session,
                            block = %self.blocks[idx].name(),
                            "summary exceeds its cap and could not be truncated"
                        );
                    }
                    report.absorbed += turns.len();
                }
                Err(_) => {
                    report.dropped += turns.len();
                    report
                        .warnings
                        .push("summarizer returned empty content; turns dropped".to_string());
                    tracing::warn!(
                        session = %self.session,
                        "summarizer returned empty content; dropping flushed turns"
                    );
                }
            },
            Err(err) => {
                report.dropped += turns.len();
                report.warnings.push(format!("absorption failed: {err}"));
                tracing::warn!(
                    session = %self.session,
                    error = %err,
                    "overflow absorption failed; dropping flushed turns"
                );
            }
        }
    }

    /// Evict or truncate one block to relieve the budget. Lowest priority
    /// goes first, ties broken by least-recently-modified. Returns false
    /// when nothing evictable remains.
    fn evict_blocks(&mut self, report: &mut FlushReport) -> bool {
        let victim = self
            .blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| b.token_estimate() > 0)
            .min_by(|(_, a), (_, b)| {
                a.priority()
                    .cmp(&b.priority())
                    .then(a.last_modified().cmp(&b.last_modified()))
            })
            .map(|(i, _)| i);

        let Some(idx) = victim else {
            return false;
        };

        let total = self.queue_tokens().saturating_add(self.block_tokens());
        let overflow = total.saturating_sub(self.config.token_limit);
        let trunc_target = self.blocks[idx].token_estimate().saturating_sub(overflow);

        if trunc_target > 0
            && self.blocks[idx].supports_truncate()
            && self.blocks[idx].truncate(trunc_target, self.estimator.as_ref())
        {
            report
                .warnings
                .push(format!("block {:?} truncated to fit budget", self.blocks[idx].name()));
            tracing::warn!(
                session = %self.session,
                block = %self.blocks[idx].name(),
                target = trunc_target,
                "truncated block to fit budget"
            );
            return true;
        }

        let block = self.blocks.remove(idx);
        report
            .warnings
            .push(format!("block {:?} evicted to fit budget", block.name()));
        tracing::warn!(
            session = %self.session,
            block = %block.name(),
            "evicting block to fit budget"
        );
        true
    }
}
