use anyhow::Result;
use regex::Regex;

/// Removes a surrounding markdown fence (with or without a language tag).
pub fn strip_code_blocks(s: &str) -> String {
    let s = s.trim();
    if !s.starts_with("```") {
        return s.to_string();
    }
    let body = match s.split_once('\n') {
        Some((_, rest)) => rest,
        None => s.trim_start_matches('`'),
    };
    body.trim_end().trim_end_matches("```").trim().to_string()
}

/// Strips stage directions from dialog before it goes to a TTS voice.
pub struct DialogTextCleaner {
    parenthetical: Regex,
    emphasis: Regex,
}

impl DialogTextCleaner {
    pub fn new() -> Result<Self> {
        Ok(Self {
            parenthetical: Regex::new(r"\([^)]+\)")?,
            emphasis: Regex::new(r"\*[^*]+\*")?,
        })
    }

    /// `(laughing)` and `*sighs*` are dropped, as is U+FFFD; whitespace is collapsed.
    pub fn clean(&self, text: &str) -> String {
        let text = self.parenthetical.replace_all(text, "");
        let text = self.emphasis.replace_all(&text, "");
        text.replace('\u{FFFD}', "")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }
}
