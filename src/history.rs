use crate::buffer::Selection;
use crate::debounce::Debounce;
use ropey::Rope;
use std::time::{Duration, Instant};
use tracing::trace;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);
pub const DEFAULT_MAX_SNAPSHOTS: usize = 500;

/// Stored buffer state. The selection is kept so undo can put the caret back
/// where it was; snapshots compare by text only.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub text: Rope,
    pub selection: Selection,
}

/// Linear undo history with debounced recording.
///
/// Changes are reported through [`History::record`]; they only become a
/// snapshot once the debounce window has passed without another change
/// ([`History::poll`]). Undo and redo move `cursor` and mark the text they
/// hand back as suppressed, so reporting that text as a change afterwards
/// does not create a new snapshot.
pub struct History {
    snapshots: Vec<Snapshot>,
    cursor: usize,
    pending: Option<Snapshot>,
    timer: Debounce,
    suppressed: Option<Rope>,
    max_snapshots: usize,
}

impl History {
    pub fn new(text: Rope, selection: Selection, window: Duration) -> Self {
        Self {
            snapshots: vec![Snapshot { text, selection }],
            cursor: 0,
            pending: None,
            timer: Debounce::new(window),
            suppressed: None,
            max_snapshots: DEFAULT_MAX_SNAPSHOTS,
        }
    }

    pub fn with_max_snapshots(mut self, max: usize) -> Self {
        self.max_snapshots = max.max(1);
        self
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    #[cfg(test)]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    #[cfg(test)]
    pub fn current(&self) -> &Snapshot {
        &self.snapshots[self.cursor]
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0 || self.pending_differs()
    }

    pub fn can_redo(&self) -> bool {
        self.cursor + 1 < self.snapshots.len() && !self.pending_differs()
    }

    /// Observes a buffer change. Restarts the debounce window.
    pub fn record(&mut self, text: &Rope, selection: Selection, now: Instant) {
        if let Some(suppressed) = self.suppressed.take() {
            if &suppressed == text {
                trace!(target: "history", cursor = self.cursor, "suppressed_change_ignored");
                return;
            }
        }
        self.pending = Some(Snapshot {
            text: text.clone(),
            selection,
        });
        self.timer.schedule(now);
    }

    /// Commits the pending change once its debounce window has elapsed.
    pub fn poll(&mut self, now: Instant) -> bool {
        if !self.timer.fire(now) {
            return false;
        }
        self.commit_pending()
    }

    /// Commits the pending change immediately.
    pub fn flush(&mut self) -> bool {
        self.timer.cancel();
        self.commit_pending()
    }

    pub fn undo(&mut self) -> Option<Snapshot> {
        self.flush();
        if self.cursor == 0 {
            return None;
        }
        self.cursor -= 1;
        trace!(target: "history", cursor = self.cursor, len = self.snapshots.len(), "undo");
        Some(self.restore())
    }

    pub fn redo(&mut self) -> Option<Snapshot> {
        self.flush();
        if self.cursor + 1 >= self.snapshots.len() {
            return None;
        }
        self.cursor += 1;
        trace!(target: "history", cursor = self.cursor, len = self.snapshots.len(), "redo");
        Some(self.restore())
    }

    /// Drops all history and starts over from `text`.
    pub fn reset(&mut self, text: Rope, selection: Selection) {
        self.snapshots = vec![Snapshot { text, selection }];
        self.cursor = 0;
        self.pending = None;
        self.suppressed = None;
        self.timer.cancel();
    }

    fn restore(&mut self) -> Snapshot {
        let snapshot = self.snapshots[self.cursor].clone();
        self.suppressed = Some(snapshot.text.clone());
        snapshot
    }

    fn pending_differs(&self) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|p| p.text != self.snapshots[self.cursor].text)
    }

    fn commit_pending(&mut self) -> bool {
        let Some(pending) = self.pending.take() else {
            return false;
        };
        if pending.text == self.snapshots[self.cursor].text {
            return false;
        }
        self.snapshots.truncate(self.cursor + 1);
        self.snapshots.push(pending);
        self.cursor = self.snapshots.len() - 1;
        if self.snapshots.len() > self.max_snapshots {
            let excess = self.snapshots.len() - self.max_snapshots;
            self.snapshots.drain(..excess);
            self.cursor -= excess;
            trace!(target: "history", dropped = excess, "oldest_snapshots_trimmed");
        }
        trace!(target: "history", cursor = self.cursor, len = self.snapshots.len(), "snapshot_committed");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(500);

    fn ms(t0: Instant, offset: u64) -> Instant {
        t0 + Duration::from_millis(offset)
    }

    fn rope(s: &str) -> Rope {
        Rope::from_str(s)
    }

    fn history(initial: &str) -> History {
        History::new(rope(initial), Selection::caret(0), WINDOW)
    }

    /// Records `text` and lets the debounce window pass.
    fn settle(history: &mut History, text: &str, t: Instant) -> Instant {
        history.record(&rope(text), Selection::caret(text.chars().count()), t);
        let later = t + WINDOW;
        assert!(history.poll(later));
        later
    }

    #[test]
    fn burst_of_edits_coalesces_into_one_snapshot() {
        let t0 = Instant::now();
        let mut h = history("");
        h.record(&rope("a"), Selection::caret(1), ms(t0, 0));
        h.record(&rope("ab"), Selection::caret(2), ms(t0, 100));
        h.record(&rope("abc"), Selection::caret(3), ms(t0, 200));
        h.record(&rope("abcd"), Selection::caret(4), ms(t0, 400));

        assert!(!h.poll(ms(t0, 600)));
        assert!(!h.poll(ms(t0, 899)));
        assert!(h.poll(ms(t0, 900)));
        assert!(!h.poll(ms(t0, 2000)));

        assert_eq!(h.len(), 2);
        assert_eq!(h.current().text.to_string(), "abcd");
    }

    #[test]
    fn unchanged_text_is_not_recorded() {
        let t0 = Instant::now();
        let mut h = history("same");
        h.record(&rope("same"), Selection::caret(0), t0);
        assert!(!h.poll(ms(t0, 500)));
        assert_eq!(h.len(), 1);
    }

    #[test]
    fn undo_redo_inverse_law() {
        let t0 = Instant::now();
        let mut h = history("start");
        let mut t = t0;
        for text in ["start 1", "start 12", "start 123"] {
            t = settle(&mut h, text, t);
        }

        for expected in ["start 12", "start 1", "start"] {
            assert_eq!(h.undo().unwrap().text.to_string(), expected);
        }
        assert!(h.undo().is_none());

        for expected in ["start 1", "start 12", "start 123"] {
            assert_eq!(h.redo().unwrap().text.to_string(), expected);
        }
        assert!(h.redo().is_none());
    }

    #[test]
    fn new_edit_after_undo_discards_redo() {
        let t0 = Instant::now();
        let mut h = history("a");
        let t = settle(&mut h, "ab", t0);
        let t = settle(&mut h, "abc", t);

        let undone = h.undo().unwrap();
        assert_eq!(undone.text.to_string(), "ab");
        h.record(&undone.text, undone.selection, t);
        settle(&mut h, "abX", t);

        assert!(!h.can_redo());
        assert!(h.redo().is_none());
        assert_eq!(h.len(), 3);
        assert_eq!(h.current().text.to_string(), "abX");
    }

    #[test]
    fn restored_text_is_not_re_recorded() {
        let t0 = Instant::now();
        let mut h = history("a");
        let t = settle(&mut h, "ab", t0);
        let undone = h.undo().unwrap();
        h.record(&undone.text, undone.selection, t);
        assert!(h.pending.is_none());
        assert!(!h.poll(t + WINDOW));
        assert_eq!(h.len(), 2);
        assert!(h.can_redo());
    }

    #[test]
    fn undo_flushes_edit_younger_than_window() {
        let t0 = Instant::now();
        let mut h = history("a");
        h.record(&rope("ab"), Selection::caret(2), t0);
        assert_eq!(h.undo().unwrap().text.to_string(), "a");
        assert_eq!(h.redo().unwrap().text.to_string(), "ab");
    }

    #[test]
    fn undo_restores_selection() {
        let t0 = Instant::now();
        let mut h = History::new(rope("abc"), Selection::caret(1), WINDOW);
        h.record(&rope("abcd"), Selection::caret(4), t0);
        let snapshot = h.undo().unwrap();
        assert_eq!(snapshot.selection, Selection::caret(1));
    }

    #[test]
    fn cap_drops_oldest_snapshots() {
        let t0 = Instant::now();
        let mut h = history("0").with_max_snapshots(3);
        let mut t = t0;
        for text in ["1", "2", "3", "4"] {
            t = settle(&mut h, text, t);
        }
        assert_eq!(h.len(), 3);
        assert_eq!(h.cursor(), 2);
        assert_eq!(h.undo().unwrap().text.to_string(), "3");
        assert_eq!(h.undo().unwrap().text.to_string(), "2");
        assert!(h.undo().is_none());
    }

    #[test]
    fn reset_starts_over() {
        let t0 = Instant::now();
        let mut h = history("a");
        settle(&mut h, "ab", t0);
        h.reset(rope("fresh"), Selection::caret(0));
        assert_eq!(h.len(), 1);
        assert!(!h.can_undo());
        assert_eq!(h.current().text.to_string(), "fresh");
    }
}
