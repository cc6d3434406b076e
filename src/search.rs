use crate::buffer::Selection;
use crate::ops::{self, Edit};
use regex::{NoExpand, Regex, RegexBuilder};
use ropey::Rope;
use std::borrow::Cow;
use std::ops::Range;
use tracing::warn;

/// A literal search needle. Case-sensitive queries scan for the needle
/// directly; case-insensitive ones compile a single escaped pattern when the
/// query is built, so `.` only ever matches a dot.
#[derive(Debug, Clone)]
pub struct Query {
    matcher: Matcher,
}

#[derive(Debug, Clone)]
enum Matcher {
    Nothing,
    Exact(String),
    Folded(Regex),
}

impl Query {
    pub fn literal(needle: &str) -> Self {
        Self::new(needle, true)
    }

    pub fn new(needle: &str, case_sensitive: bool) -> Self {
        let matcher = if needle.is_empty() {
            Matcher::Nothing
        } else if case_sensitive {
            Matcher::Exact(needle.to_string())
        } else {
            match RegexBuilder::new(&regex::escape(needle))
                .case_insensitive(true)
                .build()
            {
                Ok(re) => Matcher::Folded(re),
                Err(err) => {
                    warn!(target: "search", %err, "needle_rejected");
                    Matcher::Nothing
                }
            }
        };
        Self { matcher }
    }

    /// Byte ranges of the matches, left to right, never overlapping.
    fn byte_ranges<'h>(
        &'h self,
        haystack: &'h str,
    ) -> Box<dyn Iterator<Item = Range<usize>> + 'h> {
        match &self.matcher {
            Matcher::Nothing => Box::new(std::iter::empty()),
            Matcher::Exact(needle) => Box::new(
                haystack
                    .match_indices(needle.as_str())
                    .map(|(at, found)| at..at + found.len()),
            ),
            Matcher::Folded(re) => Box::new(re.find_iter(haystack).map(|m| m.range())),
        }
    }

    pub fn count(&self, haystack: &str) -> usize {
        self.byte_ranges(haystack).count()
    }

    /// Char ranges of every non-overlapping match, left to right.
    pub fn find_all(&self, haystack: &str) -> Vec<Range<usize>> {
        let mut out = Vec::new();
        let mut byte_cursor = 0usize;
        let mut char_cursor = 0usize;
        for found in self.byte_ranges(haystack) {
            char_cursor += haystack[byte_cursor..found.start].chars().count();
            let len = haystack[found.clone()].chars().count();
            out.push(char_cursor..char_cursor + len);
            char_cursor += len;
            byte_cursor = found.end;
        }
        out
    }

    pub fn replace_all<'h>(&self, haystack: &'h str, replacement: &str) -> Cow<'h, str> {
        match &self.matcher {
            Matcher::Nothing => Cow::Borrowed(haystack),
            Matcher::Exact(needle) if haystack.contains(needle.as_str()) => {
                Cow::Owned(haystack.replace(needle.as_str(), replacement))
            }
            Matcher::Exact(_) => Cow::Borrowed(haystack),
            Matcher::Folded(re) => re.replace_all(haystack, NoExpand(replacement)),
        }
    }
}

pub fn count(haystack: &str, needle: &str) -> usize {
    Query::literal(needle).count(haystack)
}

pub fn replace_all(haystack: &str, needle: &str, replacement: &str) -> String {
    Query::literal(needle)
        .replace_all(haystack, replacement)
        .into_owned()
}

/// Index of the first match at or after `pos`, wrapping to the first match.
pub fn next_match(matches: &[Range<usize>], pos: usize) -> Option<usize> {
    if matches.is_empty() {
        return None;
    }
    Some(matches.iter().position(|m| m.start >= pos).unwrap_or(0))
}

/// Index of the last match ending at or before `pos`, wrapping to the last.
pub fn prev_match(matches: &[Range<usize>], pos: usize) -> Option<usize> {
    if matches.is_empty() {
        return None;
    }
    Some(
        matches
            .iter()
            .rposition(|m| m.end <= pos)
            .unwrap_or(matches.len() - 1),
    )
}

/// Replaces the first match at or after the selection start and selects the
/// replacement.
pub fn replace_next(
    text: &Rope,
    selection: Selection,
    query: &Query,
    replacement: &str,
) -> Option<Edit> {
    let matches = query.find_all(&text.to_string());
    let idx = next_match(&matches, selection.start())?;
    let found = &matches[idx];
    let mut edit = ops::replace_range(text, Selection::new(found.start, found.end), replacement);
    let end = edit.selection.end();
    edit.selection = Selection::new(found.start, end);
    Some(edit)
}
