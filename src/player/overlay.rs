/// Pointer, click indicator and hint message drawn over the replay.
///
/// Times are milliseconds on the player clock.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Overlay {
    pointer: (f64, f64),
    click_until: Option<u64>,
    hint: Option<(String, u64)>,
}

/// What expired during [`Overlay::expire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Expired {
    pub click: bool,
    pub hint: bool,
}

impl Overlay {
    pub fn pointer(&self) -> (f64, f64) {
        self.pointer
    }

    pub fn is_clicking(&self) -> bool {
        self.click_until.is_some()
    }

    pub fn hint(&self) -> Option<&str> {
        self.hint.as_ref().map(|(message, _)| message.as_str())
    }

    pub fn move_pointer(&mut self, left: f64, top: f64) {
        self.pointer = (left, top);
    }

    /// Show the click indicator at the given position for `duration_ms`.
    pub fn click(&mut self, left: f64, top: f64, now: u64, duration_ms: u64) {
        self.pointer = (left, top);
        self.click_until = Some(now + duration_ms);
    }

    pub fn show_hint(&mut self, message: impl Into<String>, now: u64, duration_ms: u64) {
        self.hint = Some((message.into(), now + duration_ms));
    }

    /// Earliest moment something on the overlay changes by itself.
    pub fn deadline(&self) -> Option<u64> {
        match (self.click_until, self.hint.as_ref().map(|(_, until)| *until)) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn expire(&mut self, now: u64) -> Expired {
        let mut expired = Expired::default();
        if self.click_until.is_some_and(|until| until <= now) {
            self.click_until = None;
            expired.click = true;
        }
        if self.hint.as_ref().is_some_and(|(_, until)| *until <= now) {
            self.hint = None;
            expired.hint = true;
        }
        expired
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
