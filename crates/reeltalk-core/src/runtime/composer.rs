//! Response composer - fits answers into the channel's length limit.
//!
//! The source trailer and help footer are measured first and the body is
//! truncated into whatever room is left, so neither suffix is ever cut.

use crate::knowledge::KnowledgeEntry;

/// Telegram hard limit for text messages.
pub const TELEGRAM_MAX_LEN: usize = 4096;

pub const HELP_FOOTER: &str = "Need Help? Type /help to see how to use this bot effectively.";

const ELLIPSIS: &str = "…";

/// Where a knowledge-base answer came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerSource {
    pub kb_number: i64,
    pub category: String,
    pub taxonomy: String,
}

impl From<&KnowledgeEntry> for AnswerSource {
    fn from(entry: &KnowledgeEntry) -> Self {
        Self {
            kb_number: entry.kb_number,
            category: entry.category.clone(),
            taxonomy: entry.sub_category.clone(),
        }
    }
}

impl AnswerSource {
    fn trailer(&self) -> String {
        format!(
            "\n\n**KB Number:** {}\n**Category:** {}\n**Taxonomy:** {}",
            self.kb_number, self.category, self.taxonomy
        )
    }
}

/// Render a knowledge-base entry as the answer body.
pub fn render_knowledge_answer(entry: &KnowledgeEntry) -> String {
    format!("- **{}**: {}\n", entry.question_template, entry.answer)
}

#[derive(Debug, Clone)]
pub struct ResponseComposer {
    max_len: usize,
    footer: Option<String>,
}

impl Default for ResponseComposer {
    fn default() -> Self {
        Self::new(TELEGRAM_MAX_LEN)
    }
}

impl ResponseComposer {
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len,
            footer: Some(HELP_FOOTER.to_string()),
        }
    }

    pub fn without_footer(mut self) -> Self {
        self.footer = None;
        self
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Compose `raw` with an optional source trailer, never exceeding the
    /// limit (counted in characters).
    pub fn compose(&self, raw: &str, source: Option<&AnswerSource>) -> String {
        let footer = self
            .footer
            .as_ref()
            .map(|footer| format!("\n\n{}", footer))
            .unwrap_or_default();
        let trailer = source.map(AnswerSource::trailer).unwrap_or_default();

        // Drop whole suffix parts that cannot fit rather than cutting them.
        let mut suffix = format!("{}{}", trailer, footer);
        if char_len(&suffix) >= self.max_len {
            suffix = footer;
        }
        if char_len(&suffix) >= self.max_len {
            suffix = String::new();
        }

        let budget = self.max_len - char_len(&suffix);
        let body = truncate(raw.trim_end(), budget);
        format!("{}{}", body, suffix)
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Byte offset just past the first `chars` characters.
fn byte_offset(text: &str, chars: usize) -> usize {
    text.char_indices()
        .nth(chars)
        .map(|(index, _)| index)
        .unwrap_or(text.len())
}

/// Truncate `text` to at most `budget` characters.
///
/// 1. A period in the second half of the budget ends the text.
/// 2. Otherwise cut at the last whitespace and mark with an ellipsis.
/// 3. Otherwise hard cut and mark with an ellipsis.
fn truncate(text: &str, budget: usize) -> String {
    if char_len(text) <= budget {
        return text.to_string();
    }
    if budget == 0 {
        return String::new();
    }

    let prefix = &text[..byte_offset(text, budget)];
    if let Some(pos) = prefix.rfind('.')
        && char_len(&prefix[..pos]) >= budget / 2
    {
        return prefix[..=pos].to_string();
    }

    let room = budget - char_len(ELLIPSIS).min(budget);
    let marked = &text[..byte_offset(text, room)];
    if let Some(pos) = marked.rfind(char::is_whitespace)
        && pos > 0
    {
        return format!("{}{}", marked[..pos].trim_end(), ELLIPSIS);
    }
    format!("{}{}", marked, ELLIPSIS)
}
