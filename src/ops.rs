//! Pure text mutations. Every operation takes the current text and a
//! selection and returns the new text together with the selection that should
//! follow it; nothing here touches the live buffer.

use crate::buffer::Selection;
use ropey::Rope;

#[derive(Debug, Clone, PartialEq)]
pub struct Edit {
    pub text: Rope,
    pub selection: Selection,
}

/// Where the selection lands after [`wrap_selection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WrapStyle {
    /// Caret right after the wrapped (or default) text, before `after`.
    #[default]
    Collapse,
    /// Selection re-encloses the wrapped text.
    Enclose,
}

pub fn wrap_selection(
    text: &Rope,
    selection: Selection,
    before: &str,
    after: &str,
    default_text: &str,
    style: WrapStyle,
) -> Edit {
    let sel = selection.clamp(text.len_chars());
    let inner = if sel.is_empty() {
        default_text.to_string()
    } else {
        text.slice(sel.range()).to_string()
    };

    let mut replacement = String::with_capacity(before.len() + inner.len() + after.len());
    replacement.push_str(before);
    replacement.push_str(&inner);
    replacement.push_str(after);

    let mut out = text.clone();
    out.remove(sel.range());
    out.insert(sel.start(), &replacement);

    let inner_start = sel.start() + char_len(before);
    let inner_end = inner_start + char_len(&inner);
    let selection = match style {
        WrapStyle::Collapse => Selection::caret(inner_end),
        WrapStyle::Enclose => Selection::new(inner_start, inner_end),
    };
    Edit {
        text: out,
        selection,
    }
}

/// Inserts `prefix` at the start of the line holding the selection start.
pub fn line_prefix(text: &Rope, selection: Selection, prefix: &str) -> Edit {
    let sel = selection.clamp(text.len_chars());
    let line_start = line_start_of(text, sel.start());
    let shift = char_len(prefix);

    let mut out = text.clone();
    out.insert(line_start, prefix);
    Edit {
        text: out,
        selection: Selection::new(sel.start() + shift, sel.end() + shift),
    }
}

/// Replaces exactly `range`, regardless of where the live caret currently is.
pub fn replace_range(text: &Rope, range: Selection, new_text: &str) -> Edit {
    let range = range.clamp(text.len_chars());
    let mut out = text.clone();
    out.remove(range.range());
    out.insert(range.start(), new_text);
    Edit {
        text: out,
        selection: Selection::caret(range.start() + char_len(new_text)),
    }
}

pub fn insert_at_cursor(text: &Rope, selection: Selection, new_text: &str) -> Edit {
    replace_range(text, Selection::caret(selection.end()), new_text)
}

/// Inserts `block` so that it starts on a line of its own.
pub fn insert_block(text: &Rope, selection: Selection, block: &str) -> Edit {
    let sel = selection.clamp(text.len_chars());
    let at_line_start = sel.start() == 0 || text.char(sel.start() - 1) == '\n';
    if at_line_start || block.starts_with('\n') {
        replace_range(text, sel, block)
    } else {
        replace_range(text, sel, &format!("\n{block}"))
    }
}

/// Backspace: removes the selection, or the char before the caret.
pub fn delete_backward(text: &Rope, selection: Selection) -> Option<Edit> {
    let sel = selection.clamp(text.len_chars());
    if !sel.is_empty() {
        return Some(replace_range(text, sel, ""));
    }
    if sel.start() == 0 {
        return None;
    }
    Some(replace_range(
        text,
        Selection::new(sel.start() - 1, sel.start()),
        "",
    ))
}

/// Delete: removes the selection, or the char after the caret.
pub fn delete_forward(text: &Rope, selection: Selection) -> Option<Edit> {
    let sel = selection.clamp(text.len_chars());
    if !sel.is_empty() {
        return Some(replace_range(text, sel, ""));
    }
    if sel.end() >= text.len_chars() {
        return None;
    }
    Some(replace_range(
        text,
        Selection::new(sel.end(), sel.end() + 1),
        "",
    ))
}

pub fn image_markdown(url: &str) -> String {
    format!("![Image]({url})")
}

fn line_start_of(text: &Rope, pos: usize) -> usize {
    let mut start = pos;
    let mut chars = text.chars_at(pos);
    while let Some(ch) = chars.prev() {
        if ch == '\n' {
            break;
        }
        start -= 1;
    }
    start
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}
