use crate::debounce::Debounce;
use std::time::{Duration, Instant};

pub const DEFAULT_TOAST: Duration = Duration::from_millis(3000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastKind {
    Info,
    Error,
}

/// A single transient message. Showing a new one replaces the old one and
/// restarts the dismiss timer.
#[derive(Debug)]
pub struct Toast {
    message: Option<(ToastKind, String)>,
    timer: Debounce,
}

impl Toast {
    pub fn new(duration: Duration) -> Self {
        Self {
            message: None,
            timer: Debounce::new(duration),
        }
    }

    pub fn info(&mut self, message: impl Into<String>, now: Instant) {
        self.show(ToastKind::Info, message.into(), now);
    }

    pub fn error(&mut self, message: impl Into<String>, now: Instant) {
        self.show(ToastKind::Error, message.into(), now);
    }

    fn show(&mut self, kind: ToastKind, message: String, now: Instant) {
        self.message = Some((kind, message));
        self.timer.schedule(now);
    }

    pub fn current(&self) -> Option<(ToastKind, &str)> {
        self.message.as_ref().map(|(kind, msg)| (*kind, msg.as_str()))
    }

    /// Hides the message once its time is up. Returns true when it did.
    pub fn tick(&mut self, now: Instant) -> bool {
        if self.timer.fire(now) {
            self.message = None;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dismisses_after_its_own_delay() {
        let t0 = Instant::now();
        let mut toast = Toast::new(DEFAULT_TOAST);
        toast.info("Copied to clipboard!", t0);
        assert!(!toast.tick(t0 + Duration::from_millis(2999)));
        assert_eq!(toast.current(), Some((ToastKind::Info, "Copied to clipboard!")));
        assert!(toast.tick(t0 + DEFAULT_TOAST));
        assert_eq!(toast.current(), None);
    }

    #[test]
    fn new_message_restarts_timer() {
        let t0 = Instant::now();
        let mut toast = Toast::new(Duration::from_millis(100));
        toast.info("first", t0);
        toast.error("second", t0 + Duration::from_millis(80));
        assert!(!toast.tick(t0 + Duration::from_millis(120)));
        assert_eq!(toast.current(), Some((ToastKind::Error, "second")));
        assert!(toast.tick(t0 + Duration::from_millis(180)));
    }
}
