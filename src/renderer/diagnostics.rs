use std::collections::HashSet;

/// Emits each distinct warning once per renderer lifetime.
#[derive(Debug, Default)]
pub struct WarnOnce {
    seen: HashSet<String>,
}

impl WarnOnce {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the message was logged, false if suppressed.
    pub fn warn(&mut self, message: String) -> bool {
        if self.seen.contains(&message) {
            return false;
        }
        log::warn!("{}", message);
        self.seen.insert(message);
        true
    }

    pub fn count(&self) -> usize {
        self.seen.len()
    }
}
