use std::time::{Duration, Instant};

/// A single rescheduleable deadline. Every `schedule` replaces the previous
/// deadline instead of stacking another one.
#[derive(Debug, Clone)]
pub struct Debounce {
    window: Duration,
    deadline: Option<Instant>,
}

impl Debounce {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    pub fn schedule(&mut self, now: Instant) {
        self.deadline = Some(now + self.window);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Returns true once per scheduled deadline, when `now` has reached it.
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Debounce;
    use std::time::{Duration, Instant};

    #[test]
    fn reschedule_pushes_the_deadline_back() {
        let t0 = Instant::now();
        let mut timer = Debounce::new(Duration::from_millis(500));
        timer.schedule(t0);
        timer.schedule(t0 + Duration::from_millis(300));
        assert!(!timer.fire(t0 + Duration::from_millis(600)));
        assert!(timer.fire(t0 + Duration::from_millis(800)));
        assert!(!timer.fire(t0 + Duration::from_millis(900)));
    }

    #[test]
    fn cancel_clears_pending_deadline() {
        let t0 = Instant::now();
        let mut timer = Debounce::new(Duration::from_millis(10));
        timer.schedule(t0);
        timer.cancel();
        assert!(!timer.is_pending());
        assert!(!timer.fire(t0 + Duration::from_secs(1)));
    }
}
