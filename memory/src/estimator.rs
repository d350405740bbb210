//! Token estimation using tiktoken.
//!
//! The default estimator uses the `o200k_base` encoding, which is accurate
//! for OpenAI models and a reasonable approximation for others (proprietary
//! tokenizers may vary by ~5-10%). Estimation is deterministic, never fails,
//! and is additive enough that summing per-turn estimates approximates the
//! cost of the assembled context. Unknown or malformed content falls back to
//! a conservative byte-length estimate rather than erroring.

use std::sync::OnceLock;

use tiktoken_rs::{CoreBPE, o200k_base};

use engram_types::{ContentPart, Turn};

/// The tiktoken encoder is expensive to initialize (loads vocabulary data),
/// so we create it once and reuse it across all estimator instances.
static ENCODER: OnceLock<Option<CoreBPE>> = OnceLock::new();

fn get_encoder() -> Option<&'static CoreBPE> {
    ENCODER.get_or_init(|| o200k_base().ok()).as_ref()
}

/// Fixed overhead per turn for role markers and message delimiters.
const TURN_OVERHEAD: u32 = 4;

/// Heuristic cost of binary content, derived from its size. Providers bill
/// images at a roughly fixed bytes-per-token rate; audio is cheaper per byte.
const IMAGE_BYTES_PER_TOKEN: usize = 170;
const AUDIO_BYTES_PER_TOKEN: usize = 400;

/// Floor for any binary attachment, however small.
const MIN_ATTACHMENT_TOKENS: u32 = 16;

/// Pluggable token estimation strategy.
///
/// Contract: deterministic, total (never fails), and `estimate_str("") == 0`.
pub trait TokenEstimator: Send + Sync {
    /// Approximate token count of a string.
    fn estimate_str(&self, text: &str) -> u32;

    /// Approximate token count of one content part.
    ///
    /// Binary parts use a size-derived heuristic with a conservative floor.
    fn estimate_part(&self, part: &ContentPart) -> u32 {
        match part {
            ContentPart::Text { text } => self.estimate_str(text.as_str()),
            ContentPart::Image { data, .. } => {
                ((data.len() / IMAGE_BYTES_PER_TOKEN) as u32).max(MIN_ATTACHMENT_TOKENS)
            }
            ContentPart::Audio { data, .. } => {
                ((data.len() / AUDIO_BYTES_PER_TOKEN) as u32).max(MIN_ATTACHMENT_TOKENS)
            }
        }
    }

    /// Approximate token count of a full turn, including role overhead.
    fn estimate_turn(&self, turn: &Turn) -> u32 {
        let parts: u32 = turn
            .parts()
            .iter()
            .map(|part| self.estimate_part(part))
            .sum();
        parts + self.estimate_str(turn.role().as_str()) + TURN_OVERHEAD
    }
}

/// Thread-safe approximate estimator backed by tiktoken's `o200k_base`
/// encoding, sharing a singleton encoder instance.
#[derive(Clone, Copy)]
pub struct TiktokenEstimator {
    encoder: Option<&'static CoreBPE>,
}

impl std::fmt::Debug for TiktokenEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiktokenEstimator")
            .field("encoder", &self.encoder.as_ref().map(|_| "<CoreBPE>"))
            .finish()
    }
}

impl TiktokenEstimator {
    #[must_use]
    pub fn new() -> Self {
        let encoder = get_encoder();
        if encoder.is_none() {
            tracing::warn!(
                "failed to initialize tiktoken o200k_base encoder; falling back to byte-length estimates"
            );
        }

        Self { encoder }
    }
}

impl Default for TiktokenEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenEstimator for TiktokenEstimator {
    fn estimate_str(&self, text: &str) -> u32 {
        let len = match self.encoder {
            Some(encoder) => encoder.encode_ordinary(text).len(),
            None => text.len(),
        };

        u32::try_from(len).unwrap_or(u32::MAX)
    }
}
