use ropey::Rope;
use std::borrow::Cow;
use std::ops::Range;

/// Half-open char range over the buffer text. `start == end` is a caret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Selection {
    start: usize,
    end: usize,
}

impl Selection {
    pub fn new(a: usize, b: usize) -> Self {
        Self {
            start: a.min(b),
            end: a.max(b),
        }
    }

    pub fn caret(pos: usize) -> Self {
        Self {
            start: pos,
            end: pos,
        }
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn clamp(self, len: usize) -> Self {
        Self {
            start: self.start.min(len),
            end: self.end.min(len),
        }
    }
}

/// The document being edited plus its live selection.
///
/// The selection is stored as an anchor/head pair so shift-motions can grow it
/// from either side; [`Buffer::selection`] exposes the ordered range.
#[derive(Debug, Clone)]
pub struct Buffer {
    text: Rope,
    anchor: usize,
    head: usize,
    preferred_col: Option<usize>,
}

impl Buffer {
    pub fn new(text: &str) -> Self {
        Self::from_rope(Rope::from_str(normalize_line_endings(text).as_ref()))
    }

    pub fn from_rope(text: Rope) -> Self {
        Self {
            text,
            anchor: 0,
            head: 0,
            preferred_col: None,
        }
    }

    pub fn text(&self) -> &Rope {
        &self.text
    }

    pub fn len_chars(&self) -> usize {
        self.text.len_chars()
    }

    pub fn selection(&self) -> Selection {
        Selection::new(self.anchor, self.head)
    }

    pub fn head(&self) -> usize {
        self.head
    }

    pub fn selected_text(&self) -> String {
        let sel = self.selection();
        self.text.slice(sel.range()).to_string()
    }

    /// Replaces the whole text and selection. The selection is clamped to the
    /// new text so stale offsets never survive a mutation.
    pub fn replace(&mut self, text: Rope, selection: Selection) {
        self.text = text;
        self.set_selection(selection);
    }

    pub fn set_selection(&mut self, selection: Selection) {
        let sel = selection.clamp(self.text.len_chars());
        self.anchor = sel.start();
        self.head = sel.end();
        self.preferred_col = None;
    }

    pub fn set_caret(&mut self, pos: usize) {
        self.set_selection(Selection::caret(pos));
    }

    pub fn collapse(&mut self) {
        self.anchor = self.head;
    }

    pub fn select_all(&mut self) {
        self.anchor = 0;
        self.head = self.text.len_chars();
        self.preferred_col = None;
    }

    fn move_head(&mut self, pos: usize, extend: bool) {
        self.head = pos.min(self.text.len_chars());
        if !extend {
            self.anchor = self.head;
        }
    }

    pub fn move_left(&mut self, extend: bool) {
        let sel = self.selection();
        if !extend && !sel.is_empty() {
            self.set_caret(sel.start());
            return;
        }
        self.move_head(self.head.saturating_sub(1), extend);
        self.preferred_col = None;
    }

    pub fn move_right(&mut self, extend: bool) {
        let sel = self.selection();
        if !extend && !sel.is_empty() {
            self.set_caret(sel.end());
            return;
        }
        self.move_head(self.head + 1, extend);
        self.preferred_col = None;
    }

    pub fn move_up(&mut self, extend: bool) {
        self.move_lines(-1, extend);
    }

    pub fn move_down(&mut self, extend: bool) {
        self.move_lines(1, extend);
    }

    pub fn move_lines(&mut self, delta: isize, extend: bool) {
        let (line, col) = self.line_col();
        let max_line = self.text.len_lines().saturating_sub(1);
        let target_line = if delta.is_negative() {
            line.saturating_sub(delta.unsigned_abs())
        } else {
            (line + delta as usize).min(max_line)
        };
        if target_line == line {
            return;
        }
        let desired = self.preferred_col.unwrap_or(col);
        let target_col = desired.min(line_len_chars(&self.text, target_line));
        self.move_head(self.text.line_to_char(target_line) + target_col, extend);
        self.preferred_col = Some(desired);
    }

    pub fn move_line_start(&mut self, extend: bool) {
        let (line, _) = self.line_col();
        self.move_head(self.text.line_to_char(line), extend);
        self.preferred_col = None;
    }

    pub fn move_line_end(&mut self, extend: bool) {
        let (line, _) = self.line_col();
        let end = self.text.line_to_char(line) + line_len_chars(&self.text, line);
        self.move_head(end, extend);
        self.preferred_col = None;
    }

    pub fn move_doc_start(&mut self, extend: bool) {
        self.move_head(0, extend);
        self.preferred_col = None;
    }

    pub fn move_doc_end(&mut self, extend: bool) {
        self.move_head(self.text.len_chars(), extend);
        self.preferred_col = None;
    }

    /// Line and column (both in chars) of the selection head.
    pub fn line_col(&self) -> (usize, usize) {
        let line = self.text.char_to_line(self.head);
        let col = self.head - self.text.line_to_char(line);
        (line, col)
    }
}

/// Char length of `line` without its trailing line break.
pub fn line_len_chars(rope: &Rope, line: usize) -> usize {
    if line >= rope.len_lines() {
        return 0;
    }
    let slice = rope.line(line);
    let mut len = slice.len_chars();
    if len > 0 && slice.char(len - 1) == '\n' {
        len -= 1;
        if len > 0 && slice.char(len - 1) == '\r' {
            len -= 1;
        }
    }
    len
}

pub fn normalize_line_endings(input: &str) -> Cow<'_, str> {
    if input.contains('\r') {
        Cow::Owned(input.replace("\r\n", "\n").replace('\r', "\n"))
    } else {
        Cow::Borrowed(input)
    }
}

#[cfg(test)]
mod tests {
    use super::{normalize_line_endings, Buffer, Selection};
    use std::borrow::Cow;

    #[test]
    fn selection_orders_its_ends() {
        let sel = Selection::new(9, 3);
        assert_eq!(sel.start(), 3);
        assert_eq!(sel.end(), 9);
        assert_eq!(sel.len(), 6);
        assert!(Selection::caret(4).is_empty());
    }

    #[test]
    fn set_selection_clamps_to_text() {
        let mut buffer = Buffer::new("abc");
        buffer.set_selection(Selection::new(1, 40));
        assert_eq!(buffer.selection(), Selection::new(1, 3));
    }

    #[test]
    fn shift_motion_extends_from_anchor() {
        let mut buffer = Buffer::new("hello world");
        buffer.set_caret(5);
        buffer.move_right(true);
        buffer.move_right(true);
        assert_eq!(buffer.selection(), Selection::new(5, 7));
        buffer.move_left(false);
        assert_eq!(buffer.selection(), Selection::caret(5));
    }

    #[test]
    fn vertical_motion_keeps_preferred_column() {
        let mut buffer = Buffer::new("long line\nab\nanother line");
        buffer.set_caret(7);
        buffer.move_down(false);
        assert_eq!(buffer.line_col(), (1, 2));
        buffer.move_down(false);
        assert_eq!(buffer.line_col(), (2, 7));
    }

    #[test]
    fn line_end_stops_before_newline() {
        let mut buffer = Buffer::new("abc\ndef");
        buffer.set_caret(1);
        buffer.move_line_end(false);
        assert_eq!(buffer.head(), 3);
        buffer.move_doc_end(true);
        assert_eq!(buffer.selected_text(), "\ndef");
    }

    #[test]
    fn empty_buffer_is_valid() {
        let mut buffer = Buffer::new("");
        buffer.move_left(false);
        buffer.move_down(false);
        assert_eq!(buffer.selection(), Selection::caret(0));
        assert_eq!(buffer.line_col(), (0, 0));
    }

    #[test]
    fn normalize_line_endings_preserves_lf_input() {
        let input = "a\nb\n";
        let normalized = normalize_line_endings(input);
        assert!(matches!(normalized, Cow::Borrowed(_)));
        assert_eq!(normalized.as_ref(), input);
    }

    #[test]
    fn normalize_line_endings_converts_crlf_and_cr() {
        let normalized = normalize_line_endings("a\r\nb\rc\r\n");
        assert_eq!(normalized.as_ref(), "a\nb\nc\n");
    }
}
