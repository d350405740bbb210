//! Context assembly - the derived view handed to the model.
//!
//! [`assemble`] is a pure function over its inputs: rendered blocks, the
//! live queue, and any pending ad-hoc insert. It is deterministic given
//! identical inputs; dynamic block content changing between calls is a
//! caller-visible nondeterminism source by design, not a bug. Assembly
//! never mutates stored state.

use engram_types::{ContentPart, Role, Turn};

/// One entry of the assembled context, ready for model consumption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextEntry {
    pub role: Role,
    pub text: String,
}

/// Where a pending insert lands in the assembled context.
///
/// Exactly one mode is active per manager instance, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertMode {
    /// A separate leading system entry.
    Separate,
    /// Merged into the most recent user entry; falls back to a separate
    /// leading entry when the queue holds no user turn.
    Merged,
}

/// A block already rendered to text, in final render order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedBlock {
    pub name: String,
    pub content: String,
}

/// The ordered content handed to the model for one completion call.
///
/// Ephemeral: recomputed on every read, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AssembledContext {
    entries: Vec<ContextEntry>,
}

impl AssembledContext {
    #[must_use]
    pub fn entries(&self) -> &[ContextEntry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn into_entries(self) -> Vec<ContextEntry> {
        self.entries
    }
}

/// Render the block section as one system entry: each block under a
/// `# name` header, in the order given.
fn render_block_section(blocks: &[RenderedBlock]) -> String {
    let mut out = String::new();
    for block in blocks {
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str("# ");
        out.push_str(&block.name);
        out.push('\n');
        out.push_str(&block.content);
    }
    out
}

/// Text projection of a turn. Binary parts become bracketed markers so the
/// entry still accounts for them.
fn entry_text(turn: &Turn) -> String {
    let mut out = String::new();
    for part in turn.parts() {
        if !out.is_empty() {
            out.push('\n');
        }
        match part {
            ContentPart::Text { text } => out.push_str(text.as_str()),
            ContentPart::Image { media_type, .. } => {
                out.push_str(&format!("[image: {media_type}]"));
            }
            ContentPart::Audio { media_type, .. } => {
                out.push_str(&format!("[audio: {media_type}]"));
            }
        }
    }
    out
}

/// Merge blocks, queue, and pending insert into the final entry sequence.
///
/// Layout: block section (one system entry) first, then the queue in
/// chronological order. A pending insert is placed according to `mode`;
/// merging never changes the entry count of the queue portion.
#[must_use]
pub fn assemble(
    blocks: &[RenderedBlock],
    queue: &[&Turn],
    pending_insert: Option<&str>,
    mode: InsertMode,
) -> AssembledContext {
    let mut entries = Vec::with_capacity(blocks.len() + queue.len() + 2);

    if !blocks.is_empty() {
        entries.push(ContextEntry {
            role: Role::System,
            text: render_block_section(blocks),
        });
    }

    let mut queue_entries: Vec<ContextEntry> = queue
        .iter()
        .map(|turn| ContextEntry {
            role: turn.role(),
            text: entry_text(turn),
        })
        .collect();

    let mut separate_note = None;
    if let Some(note) = pending_insert {
        match mode {
            InsertMode::Separate => separate_note = Some(note),
            InsertMode::Merged => {
                let last_user = queue_entries
                    .iter_mut()
                    .rev()
                    .find(|entry| entry.role == Role::User);
                match last_user {
                    Some(entry) => {
                        entry.text.push_str("\n\n");
                        entry.text.push_str(note);
                    }
                    None => separate_note = Some(note),
                }
            }
        }
    }

    if let Some(note) = separate_note {
        entries.push(ContextEntry {
            role: Role::System,
            text: note.to_string(),
        });
    }

    entries.extend(queue_entries);

    AssembledContext { entries }
}

#[cfg(test)]
mod tests {
    use super::{AssembledContext, ContextEntry, InsertMode, RenderedBlock, assemble};
    use engram_types::{ContentPart, Role, Turn};

    fn block(name: &str, content: &str) -> RenderedBlock {
        RenderedBlock {
            name: name.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn empty_inputs_yield_empty_context() {
        let ctx = assemble(&[], &[], None, InsertMode::Separate);
        assert!(ctx.is_empty());
        assert_eq!(ctx, AssembledContext::default());
    }

    #[test]
    fn blocks_render_as_one_leading_system_entry() {
        let blocks = vec![block("persona", "You are terse."), block("file_a", "fn main() {}")];
        let turn = Turn::try_user("hi").expect("non-empty");
        let ctx = assemble(&blocks, &[&turn], None, InsertMode::Separate);

        assert_eq!(ctx.len(), 2);
        let system = &ctx.entries()[0];
        assert_eq!(system.role, Role::System);
        assert!(system.text.contains("# persona"));
        assert!(system.text.contains("# file_a"));
        assert!(system.text.find("persona").unwrap() < system.text.find("file_a").unwrap());
    }

    #[test]
    fn queue_stays_chronological() {
        let first = Turn::try_user("first").expect("non-empty");
        let second = Turn::try_assistant("second").expect("non-empty");
        let ctx = assemble(&[], &[&first, &second], None, InsertMode::Separate);

        assert_eq!(ctx.entries()[0].text, "first");
        assert_eq!(ctx.entries()[1].text, "second");
    }

    #[test]
    fn separate_insert_is_a_leading_entry() {
        let turn = Turn::try_user("question").expect("non-empty");
        let ctx = assemble(&[], &[&turn], Some("context note"), InsertMode::Separate);

        assert_eq!(ctx.len(), 2);
        assert_eq!(
            ctx.entries()[0],
            ContextEntry {
                role: Role::System,
                text: "context note".to_string()
            }
        );
    }

    #[test]
    fn merged_insert_lands_in_last_user_entry() {
        let user = Turn::try_user("original question").expect("non-empty");
        let reply = Turn::try_assistant("reply").expect("non-empty");
        let last_user = Turn::try_user("follow-up").expect("non-empty");
        let queue = [&user, &reply, &last_user];

        let ctx = assemble(&[], &queue, Some("context note"), InsertMode::Merged);

        // Entry count unchanged by merging.
        assert_eq!(ctx.len(), 3);
        let merged = &ctx.entries()[2];
        assert_eq!(merged.role, Role::User);
        assert!(merged.text.contains("follow-up"));
        assert!(merged.text.contains("context note"));
        // Earlier user entry untouched.
        assert_eq!(ctx.entries()[0].text, "original question");
    }

    #[test]
    fn merged_insert_without_user_turn_falls_back_to_separate() {
        let reply = Turn::try_assistant("reply").expect("non-empty");
        let ctx = assemble(&[], &[&reply], Some("note"), InsertMode::Merged);

        assert_eq!(ctx.len(), 2);
        assert_eq!(ctx.entries()[0].role, Role::System);
        assert_eq!(ctx.entries()[0].text, "note");
    }

    #[test]
    fn binary_parts_become_markers() {
        let turn = Turn::new(
            Role::User,
            vec![
                ContentPart::text("see attachment").expect("non-empty"),
                ContentPart::image("image/png", vec![0u8; 4]),
            ],
            std::time::SystemTime::now(),
        );
        let ctx = assemble(&[], &[&turn], None, InsertMode::Separate);

        assert_eq!(ctx.entries()[0].text, "see attachment\n[image: image/png]");
    }

    #[test]
    fn deterministic_for_identical_inputs() {
        let blocks = vec![block("pins", "pinned text")];
        let turn = Turn::try_user("hello").expect("non-empty");
        let queue = [&turn];

        let a = assemble(&blocks, &queue, Some("n"), InsertMode::Separate);
        let b = assemble(&blocks, &queue, Some("n"), InsertMode::Separate);
        assert_eq!(a, b);
    }
}
