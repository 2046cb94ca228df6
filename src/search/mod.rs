use crate::config::SearchOptions;
use crate::model::ItemKind;
use crate::tree::Record;

/// Case-insensitive substring query over entry titles (and optionally subtitles).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub text: String,
    needle: String,
    pub match_subtitles: bool,
    pub max_results: usize,
}

impl SearchQuery {
    /// Returns `None` for text that is empty once trimmed.
    pub fn parse(input: &str, options: &SearchOptions) -> Option<Self> {
        let text = input.trim();
        if text.is_empty() {
            return None;
        }
        Some(Self {
            text: text.to_string(),
            needle: text.to_lowercase(),
            match_subtitles: options.match_subtitles,
            max_results: options.max_results,
        })
    }

    pub fn matches(&self, record: &Record) -> bool {
        if record.kind != ItemKind::Entry {
            return false;
        }
        if contains_folded(&record.title, &self.needle) {
            return true;
        }
        self.match_subtitles && contains_folded(&record.subtitle, &self.needle)
    }

    /// Applies the configured cap; zero means unlimited.
    pub fn limit<T>(&self, results: &mut Vec<T>) {
        if self.max_results > 0 && results.len() > self.max_results {
            results.truncate(self.max_results);
        }
    }
}

fn contains_folded(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(needle)
}
