use std::collections::HashSet;

/// MessageLog remembers which messages were already logged,
/// so that repeated failures of the same shape are reported in full only once.
#[derive(Debug, Default)]
pub struct MessageLog {
    seen: HashSet<String>,
}

impl MessageLog {
    /// Returns true if `message` was not seen before.
    pub fn first_occurrence(&mut self, message: &str) -> bool {
        if self.seen.contains(message) {
            return false;
        }
        self.seen.insert(message.to_string());
        true
    }
}
