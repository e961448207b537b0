//! Duplicate suppression for polled event documents.
//!
//! Readers poll the same key repeatedly; an event is handled only when its
//! key (`TimeStamp`, request `id`) differs from the last one handled.

#[derive(Debug, Default)]
pub struct EventGate {
    last: Option<String>,
}

impl EventGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if `key` is new; remembers it
    pub fn admit(&mut self, key: &str) -> bool {
        if self.last.as_deref() == Some(key) {
            return false;
        }
        self.last = Some(key.to_string());
        true
    }

    pub fn last(&self) -> Option<&str> {
        self.last.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_key_is_rejected() {
        let mut gate = EventGate::new();
        assert!(gate.admit("2024-01-01 10:00:00"));
        assert!(!gate.admit("2024-01-01 10:00:00"));
        assert!(gate.admit("2024-01-01 10:00:05"));
        assert_eq!(gate.last(), Some("2024-01-01 10:00:05"));
    }

    #[test]
    fn test_older_key_counts_as_new() {
        let mut gate = EventGate::new();
        assert!(gate.admit("b"));
        assert!(gate.admit("a"));
        assert!(gate.admit("b"));
    }
}
