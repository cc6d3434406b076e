use crate::buffer::{Buffer, Selection};
use crate::history::{self, History, Snapshot};
use crate::keymap::Command;
use crate::ops::{self, Edit, WrapStyle};
use crate::search::{self, Query};
use ropey::Rope;
use std::ops::Range;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct EditorSettings {
    pub history_window: Duration,
    pub max_snapshots: usize,
    pub case_sensitive: bool,
}

impl Default for EditorSettings {
    fn default() -> Self {
        Self {
            history_window: history::DEFAULT_DEBOUNCE,
            max_snapshots: history::DEFAULT_MAX_SNAPSHOTS,
            case_sensitive: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Motion {
    Left,
    Right,
    Up,
    Down,
    Lines(isize),
    LineStart,
    LineEnd,
    DocStart,
    DocEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FindField {
    #[default]
    Needle,
    Replacement,
}

/// State of the find/replace panel.
#[derive(Debug, Clone, Default)]
pub struct FindReplace {
    pub visible: bool,
    pub needle: String,
    pub replacement: String,
    pub field: FindField,
    current: Option<usize>,
    query: Option<Query>,
    cache: Option<(u64, Vec<Range<usize>>)>,
}

impl FindReplace {
    pub fn current(&self) -> Option<usize> {
        self.current
    }

    fn input(&mut self) -> &mut String {
        match self.field {
            FindField::Needle => &mut self.needle,
            FindField::Replacement => &mut self.replacement,
        }
    }
}

/// One editing session: the buffer, its undo history, the find/replace
/// panel, and the selection captured when focus last left the text.
pub struct Editor {
    buffer: Buffer,
    history: History,
    find: FindReplace,
    saved_selection: Option<Selection>,
    case_sensitive: bool,
    revision: u64,
}

impl Editor {
    pub fn new(text: &str, settings: &EditorSettings) -> Self {
        let buffer = Buffer::new(text);
        let history = History::new(
            buffer.text().clone(),
            buffer.selection(),
            settings.history_window,
        )
        .with_max_snapshots(settings.max_snapshots);
        Self {
            buffer,
            history,
            find: FindReplace::default(),
            saved_selection: None,
            case_sensitive: settings.case_sensitive,
            revision: 0,
        }
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub fn text(&self) -> &Rope {
        self.buffer.text()
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// Bumped on every text change; lets callers cache derived views.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn apply_edit(&mut self, edit: Edit, now: Instant) {
        self.buffer.replace(edit.text, edit.selection);
        self.history
            .record(self.buffer.text(), self.buffer.selection(), now);
        self.revision += 1;
    }

    /// Runs an editing command. Returns false for commands the host owns.
    pub fn apply(&mut self, command: Command, now: Instant) -> bool {
        if let Some((before, after, default_text)) = command.wrap_markers() {
            self.wrap(before, after, default_text, WrapStyle::Collapse, now);
            return true;
        }
        if let Some(prefix) = command.line_prefix() {
            self.prefix_line(prefix, now);
            return true;
        }
        match command {
            Command::Undo => {
                self.undo(now);
            }
            Command::Redo => {
                self.redo(now);
            }
            Command::ToggleFind => self.toggle_find(),
            Command::SelectAll => self.buffer.select_all(),
            _ => return false,
        }
        true
    }

    pub fn undo(&mut self, now: Instant) -> bool {
        match self.history.undo() {
            Some(snapshot) => {
                self.restore(snapshot, now);
                true
            }
            None => false,
        }
    }

    pub fn redo(&mut self, now: Instant) -> bool {
        match self.history.redo() {
            Some(snapshot) => {
                self.restore(snapshot, now);
                true
            }
            None => false,
        }
    }

    fn restore(&mut self, snapshot: Snapshot, now: Instant) {
        self.buffer.replace(snapshot.text, snapshot.selection);
        self.history
            .record(self.buffer.text(), self.buffer.selection(), now);
        self.revision += 1;
    }

    /// Advances the history debounce. Returns true when a snapshot was taken.
    pub fn tick(&mut self, now: Instant) -> bool {
        self.history.poll(now)
    }

    pub fn flush_history(&mut self) {
        self.history.flush();
    }

    /// Swaps in another document with a fresh history.
    pub fn reset(&mut self, text: &str) {
        self.buffer = Buffer::new(text);
        self.history
            .reset(self.buffer.text().clone(), self.buffer.selection());
        self.saved_selection = None;
        self.revision += 1;
    }

    pub fn move_cursor(&mut self, motion: Motion, extend: bool) {
        match motion {
            Motion::Left => self.buffer.move_left(extend),
            Motion::Right => self.buffer.move_right(extend),
            Motion::Up => self.buffer.move_up(extend),
            Motion::Down => self.buffer.move_down(extend),
            Motion::Lines(delta) => self.buffer.move_lines(delta, extend),
            Motion::LineStart => self.buffer.move_line_start(extend),
            Motion::LineEnd => self.buffer.move_line_end(extend),
            Motion::DocStart => self.buffer.move_doc_start(extend),
            Motion::DocEnd => self.buffer.move_doc_end(extend),
        }
    }

    #[cfg(test)]
    pub fn set_selection(&mut self, selection: Selection) {
        self.buffer.set_selection(selection);
    }

    pub fn collapse_selection(&mut self) {
        self.buffer.collapse();
    }

    pub fn wrap(
        &mut self,
        before: &str,
        after: &str,
        default_text: &str,
        style: WrapStyle,
        now: Instant,
    ) {
        let edit = ops::wrap_selection(
            self.buffer.text(),
            self.buffer.selection(),
            before,
            after,
            default_text,
            style,
        );
        self.apply_edit(edit, now);
    }

    pub fn prefix_line(&mut self, prefix: &str, now: Instant) {
        let edit = ops::line_prefix(self.buffer.text(), self.buffer.selection(), prefix);
        self.apply_edit(edit, now);
    }

    /// Typing: the text replaces the live selection.
    pub fn insert_text(&mut self, text: &str, now: Instant) {
        let edit = ops::replace_range(self.buffer.text(), self.buffer.selection(), text);
        self.apply_edit(edit, now);
    }

    pub fn backspace(&mut self, now: Instant) {
        if let Some(edit) = ops::delete_backward(self.buffer.text(), self.buffer.selection()) {
            self.apply_edit(edit, now);
        }
    }

    pub fn delete(&mut self, now: Instant) {
        if let Some(edit) = ops::delete_forward(self.buffer.text(), self.buffer.selection()) {
            self.apply_edit(edit, now);
        }
    }

    /// Remembers the live selection before focus moves to another widget.
    pub fn capture_selection(&mut self) -> Selection {
        let selection = self.buffer.selection();
        self.saved_selection = Some(selection);
        debug!(target: "editor", start = selection.start(), end = selection.end(), "selection_captured");
        selection
    }

    pub fn saved_selection(&self) -> Option<Selection> {
        self.saved_selection
    }

    pub fn saved_text(&self) -> String {
        let range = self
            .saved_selection
            .unwrap_or_else(|| self.buffer.selection())
            .clamp(self.buffer.len_chars());
        self.buffer.text().slice(range.range()).to_string()
    }

    pub fn clear_saved_selection(&mut self) {
        self.saved_selection = None;
    }

    /// Selection-replace against an explicit range, not the live caret.
    pub fn replace_range(&mut self, range: Selection, text: &str, now: Instant) {
        let edit = ops::replace_range(self.buffer.text(), range, text);
        self.apply_edit(edit, now);
    }

    /// Replaces the captured selection and forgets the capture. Without a
    /// capture the text goes in at the caret, keeping the live selection.
    pub fn insert_at_saved(&mut self, text: &str, now: Instant) {
        let edit = match self.saved_selection.take() {
            Some(range) => ops::replace_range(self.buffer.text(), range, text),
            None => ops::insert_at_cursor(self.buffer.text(), self.buffer.selection(), text),
        };
        self.apply_edit(edit, now);
    }

    pub fn insert_block_at_saved(&mut self, block: &str, now: Instant) {
        let range = self
            .saved_selection
            .take()
            .unwrap_or_else(|| self.buffer.selection());
        let edit = ops::insert_block(self.buffer.text(), range, block);
        self.apply_edit(edit, now);
    }

    /// Replaces the entire document as one undoable edit.
    pub fn replace_document(&mut self, text: &str, now: Instant) {
        let all = Selection::new(0, self.buffer.len_chars());
        let mut edit = ops::replace_range(self.buffer.text(), all, text);
        edit.selection = Selection::caret(0);
        self.saved_selection = None;
        self.apply_edit(edit, now);
    }

    pub fn find(&self) -> &FindReplace {
        &self.find
    }

    pub fn toggle_find(&mut self) {
        self.find.visible = !self.find.visible;
        self.find.field = FindField::Needle;
        if self.find.visible && self.find.needle.is_empty() {
            let selected = self.buffer.selected_text();
            if !selected.is_empty() && !selected.contains('\n') {
                self.find.needle = selected;
                self.find.query = None;
                self.find.cache = None;
            }
        }
    }

    pub fn switch_find_field(&mut self) {
        self.find.field = match self.find.field {
            FindField::Needle => FindField::Replacement,
            FindField::Replacement => FindField::Needle,
        };
    }

    pub fn find_input_push(&mut self, ch: char) {
        self.find.input().push(ch);
        self.invalidate_matches();
    }

    pub fn find_input_pop(&mut self) {
        self.find.input().pop();
        self.invalidate_matches();
    }

    fn invalidate_matches(&mut self) {
        if self.find.field == FindField::Needle {
            self.find.query = None;
            self.find.cache = None;
            self.find.current = None;
        }
    }

    /// Char ranges of all matches of the current needle.
    pub fn matches(&mut self) -> &[Range<usize>] {
        let fresh = matches!(&self.find.cache, Some((rev, _)) if *rev == self.revision);
        if !fresh {
            let text = self.buffer.text().to_string();
            let found = compiled(&mut self.find.query, &self.find.needle, self.case_sensitive)
                .find_all(&text);
            self.find.cache = Some((self.revision, found));
        }
        match &self.find.cache {
            Some((_, found)) => found,
            None => &[],
        }
    }

    pub fn match_count(&mut self) -> usize {
        self.matches().len()
    }

    /// Selects the next match after the selection. Returns false if none.
    pub fn find_next(&mut self) -> bool {
        let pos = self.buffer.selection().end();
        let matches = self.matches();
        let next = search::next_match(matches, pos).map(|idx| (idx, matches[idx].clone()));
        self.select_match(next)
    }

    pub fn find_prev(&mut self) -> bool {
        let pos = self.buffer.selection().start();
        let matches = self.matches();
        let prev = search::prev_match(matches, pos).map(|idx| (idx, matches[idx].clone()));
        self.select_match(prev)
    }

    fn select_match(&mut self, found: Option<(usize, Range<usize>)>) -> bool {
        match found {
            Some((idx, range)) => {
                self.find.current = Some(idx);
                self.buffer.set_selection(Selection::new(range.start, range.end));
                true
            }
            None => {
                self.find.current = None;
                false
            }
        }
    }

    pub fn replace_next(&mut self, now: Instant) -> bool {
        let query = compiled(&mut self.find.query, &self.find.needle, self.case_sensitive);
        let edit = search::replace_next(
            self.buffer.text(),
            self.buffer.selection(),
            query,
            &self.find.replacement,
        );
        match edit {
            Some(edit) => {
                self.apply_edit(edit, now);
                true
            }
            None => false,
        }
    }

    /// Replaces every match. Returns how many were replaced.
    pub fn replace_all(&mut self, now: Instant) -> usize {
        let source = self.buffer.text().to_string();
        let query = compiled(&mut self.find.query, &self.find.needle, self.case_sensitive);
        let replaced = query.count(&source);
        if replaced == 0 {
            return 0;
        }
        let updated = query.replace_all(&source, &self.find.replacement).into_owned();
        let caret = Selection::caret(self.buffer.selection().start());
        debug!(target: "editor", replaced, "replace_all");
        self.apply_edit(
            Edit {
                text: Rope::from_str(&updated),
                selection: caret,
            },
            now,
        );
        replaced
    }
}

/// The query for `needle`, built on first use after the needle changes.
fn compiled<'q>(slot: &'q mut Option<Query>, needle: &str, case_sensitive: bool) -> &'q Query {
    slot.get_or_insert_with(|| Query::new(needle, case_sensitive))
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(500);

    fn editor(text: &str) -> Editor {
        Editor::new(text, &EditorSettings::default())
    }

    fn text(editor: &Editor) -> String {
        editor.text().to_string()
    }

    #[test]
    fn undo_n_times_restores_state_before_first_edit() {
        let t0 = Instant::now();
        let mut ed = editor("# Title\n");
        ed.set_selection(Selection::caret(8));
        let mut t = t0;
        for word in ["one ", "two ", "three"] {
            ed.insert_text(word, t);
            t += WINDOW;
            assert!(ed.tick(t));
        }
        let after = text(&ed);

        for _ in 0..3 {
            assert!(ed.undo(t));
        }
        assert_eq!(text(&ed), "# Title\n");
        assert!(!ed.undo(t));

        for _ in 0..3 {
            assert!(ed.redo(t));
        }
        assert_eq!(text(&ed), after);
    }

    #[test]
    fn undo_is_not_recorded_as_new_edit() {
        let t0 = Instant::now();
        let mut ed = editor("a");
        ed.set_selection(Selection::caret(1));
        ed.insert_text("b", t0);
        ed.tick(t0 + WINDOW);
        ed.undo(t0 + WINDOW);
        assert!(!ed.tick(t0 + WINDOW * 4));
        assert_eq!(ed.history().len(), 2);
        assert!(ed.redo(t0 + WINDOW * 4));
        assert_eq!(text(&ed), "ab");
    }

    #[test]
    fn new_edit_after_undo_makes_redo_noop() {
        let t0 = Instant::now();
        let mut ed = editor("");
        ed.insert_text("x", t0);
        ed.tick(t0 + WINDOW);
        ed.undo(t0 + WINDOW);
        ed.insert_text("y", t0 + WINDOW);
        ed.tick(t0 + WINDOW * 2);
        assert!(!ed.redo(t0 + WINDOW * 2));
        assert_eq!(text(&ed), "y");
    }

    #[test]
    fn undo_restores_caret() {
        let t0 = Instant::now();
        let mut ed = editor("abc");
        ed.set_selection(Selection::caret(1));
        ed.tick(t0);
        ed.apply(Command::Bold, t0);
        assert_eq!(text(&ed), "a**bold text**bc");
        ed.undo(t0);
        assert_eq!(text(&ed), "abc");
        assert_eq!(ed.buffer().selection(), Selection::caret(0));
    }

    #[test]
    fn commands_route_to_operations() {
        let t0 = Instant::now();
        let mut ed = editor("word");
        ed.set_selection(Selection::new(0, 4));
        assert!(ed.apply(Command::Italic, t0));
        assert_eq!(text(&ed), "*word*");
        assert!(ed.apply(Command::Heading2, t0));
        assert_eq!(text(&ed), "## *word*");
        assert!(ed.apply(Command::ToggleFind, t0));
        assert!(ed.find().visible);
        assert!(!ed.apply(Command::Save, t0));
    }

    #[test]
    fn selection_replace_uses_captured_range() {
        let t0 = Instant::now();
        let mut ed = editor("Hello world");
        ed.set_selection(Selection::new(6, 11));
        let captured = ed.capture_selection();
        ed.set_selection(Selection::caret(0));
        ed.replace_range(captured, "there", t0);
        assert_eq!(text(&ed), "Hello there");
        assert_eq!(ed.buffer().selection(), Selection::caret(11));
    }

    #[test]
    fn insert_at_saved_consumes_capture() {
        let t0 = Instant::now();
        let mut ed = editor("ab");
        ed.set_selection(Selection::caret(1));
        ed.capture_selection();
        ed.move_cursor(Motion::DocEnd, false);
        ed.insert_at_saved("🎯", t0);
        assert_eq!(text(&ed), "a🎯b");
        assert!(ed.saved_selection().is_none());
    }

    #[test]
    fn insert_without_capture_goes_in_at_caret() {
        let t0 = Instant::now();
        let mut ed = editor("keep me");
        ed.set_selection(Selection::new(0, 4));
        ed.insert_at_saved("!", t0);
        assert_eq!(text(&ed), "keep! me");
        assert_eq!(ed.buffer().selection(), Selection::caret(5));
    }

    #[test]
    fn reset_opens_a_fresh_document() {
        let t0 = Instant::now();
        let mut ed = editor("first");
        ed.insert_text("!", t0);
        ed.capture_selection();
        let before = ed.revision();
        ed.reset("second\r\n");
        assert_eq!(text(&ed), "second\n");
        assert!(ed.revision() > before);
        assert!(ed.saved_selection().is_none());
        assert!(!ed.history().can_undo());
        assert!(!ed.undo(t0));
        assert_eq!(text(&ed), "second\n");
    }

    #[test]
    fn replace_document_is_undoable() {
        let t0 = Instant::now();
        let mut ed = editor("old");
        ed.replace_document("# New", t0);
        assert_eq!(text(&ed), "# New");
        ed.undo(t0);
        assert_eq!(text(&ed), "old");
    }

    #[test]
    fn find_and_replace_panel() {
        let t0 = Instant::now();
        let mut ed = editor("a.b.c");
        ed.toggle_find();
        ed.find_input_push('.');
        assert_eq!(ed.match_count(), 2);
        assert!(ed.find_next());
        assert_eq!(ed.buffer().selection(), Selection::new(1, 2));
        assert!(ed.find_next());
        assert_eq!(ed.buffer().selection(), Selection::new(3, 4));
        assert!(ed.find_next());
        assert_eq!(ed.buffer().selection(), Selection::new(1, 2));

        ed.switch_find_field();
        ed.find_input_push('-');
        assert_eq!(ed.replace_all(t0), 2);
        assert_eq!(text(&ed), "a-b-c");
        assert_eq!(ed.match_count(), 0);
        assert!(ed.matches().is_empty());
    }

    #[test]
    fn replace_all_with_empty_needle_is_noop() {
        let t0 = Instant::now();
        let mut ed = editor("abc");
        ed.toggle_find();
        assert_eq!(ed.replace_all(t0), 0);
        assert_eq!(text(&ed), "abc");
        assert_eq!(ed.revision(), 0);
    }

    #[test]
    fn pasted_long_needle_is_searchable() {
        let t0 = Instant::now();
        let needle = "ab".repeat(16 * 1024);
        let mut ed = editor(&format!("x{needle}y{needle}"));
        ed.toggle_find();
        for ch in needle.chars() {
            ed.find_input_push(ch);
        }
        assert_eq!(ed.match_count(), 2);
        ed.switch_find_field();
        ed.find_input_push('Z');
        assert_eq!(ed.replace_all(t0), 2);
        assert_eq!(text(&ed), "xZyZ");
    }

    #[test]
    fn case_insensitive_setting_applies_to_panel() {
        let settings = EditorSettings {
            case_sensitive: false,
            ..EditorSettings::default()
        };
        let mut ed = Editor::new("Readme README readme", &settings);
        ed.toggle_find();
        for ch in "readme".chars() {
            ed.find_input_push(ch);
        }
        assert_eq!(ed.match_count(), 3);
        ed.find_input_pop();
        ed.find_input_push('X');
        assert_eq!(ed.match_count(), 0);
    }

    #[test]
    fn toggle_find_seeds_needle_from_selection() {
        let mut ed = editor("find me");
        ed.set_selection(Selection::new(5, 7));
        ed.toggle_find();
        assert_eq!(ed.find().needle, "me");
        assert_eq!(ed.match_count(), 1);
    }
}
