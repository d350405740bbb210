//! Token-budgeted conversational memory for model-facing applications.
//!
//! The crate manages what a conversation "remembers" inside a fixed token
//! budget. Three kinds of state cooperate:
//!
//! - the live queue of turns, persisted through a [`MessageStore`] and
//!   flushed oldest-first when the budget tightens;
//! - named [`MemoryBlock`]s (pinned content, dynamic sources, running
//!   summaries) that survive flushes;
//! - an ephemeral [`AssembledContext`], recomputed on every read and
//!   handed to the model.
//!
//! ```text
//! append(turn) ──> MessageStore ──> queue ──┐
//!                                 (flush)   ├──> read() ──> AssembledContext
//! blocks: pins / dynamic / summary ─────────┘
//! ```
//!
//! [`MemoryManager`] owns one session's state; wrap it in a
//! [`SharedSession`] to share across tasks. Token accounting goes through
//! the pluggable [`TokenEstimator`]; estimation is approximate and never
//! fatal.

mod assemble;
mod block;
mod capability;
mod error;
mod estimator;
mod manager;
mod session;
mod store;
mod usage;

pub use assemble::{AssembledContext, ContextEntry, InsertMode, RenderedBlock, assemble};
pub use block::{BlockKind, MemoryBlock};
pub use capability::{ContextSource, ModelService, Summarizer, fetch_with_timeout};
pub use error::{CapabilityError, MemoryError};
pub use estimator::{TiktokenEstimator, TokenEstimator};
pub use manager::{FlushReport, MemoryConfig, MemoryManager, PinnedContent};
pub use session::SharedSession;
pub use store::{InMemoryMessageStore, MessageStore, SqliteMessageStore, StoredTurn};
pub use usage::ContextUsage;
