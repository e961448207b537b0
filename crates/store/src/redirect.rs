//! Cluster redirect handling

use std::collections::HashSet;
use std::fmt;
use std::sync::Mutex;

use crate::lock;

/// `host:port` pair
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `host:port`
    pub fn parse(text: &str) -> Option<Self> {
        let (host, port) = text.trim().rsplit_once(':')?;
        if host.is_empty() {
            return None;
        }
        Some(Self::new(host, port.parse().ok()?))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A `MOVED <slot> <host>:<port>` reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub slot: u16,
    pub target: Endpoint,
}

impl Redirect {
    /// Parse a server error string; `None` unless it is a MOVED redirect
    pub fn parse(message: &str) -> Option<Self> {
        let mut parts = message.split_whitespace();
        if parts.next()? != "MOVED" {
            return None;
        }
        let slot = parts.next()?.parse().ok()?;
        let target = Endpoint::parse(parts.next()?)?;
        Some(Self { slot, target })
    }
}

/// Remembers redirect targets so each one is logged only once
#[derive(Debug, Default)]
pub struct RedirectLog {
    seen: Mutex<HashSet<String>>,
}

impl RedirectLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// True the first time `target` is reported
    pub fn first_seen(&self, target: &Endpoint) -> bool {
        lock(&self.seen).insert(target.to_string())
    }

    pub fn len(&self) -> usize {
        lock(&self.seen).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_moved() {
        let r = Redirect::parse("MOVED 3999 172.18.0.4:6381").unwrap();
        assert_eq!(r.slot, 3999);
        assert_eq!(r.target, Endpoint::new("172.18.0.4", 6381));
    }

    #[test]
    fn test_parse_non_redirect() {
        assert!(Redirect::parse("ERR unknown command").is_none());
        assert!(Redirect::parse("MOVED abc 1.2.3.4:1").is_none());
        assert!(Redirect::parse("MOVED 1 nohost").is_none());
    }

    #[test]
    fn test_redirect_logged_once_per_target() {
        let log = RedirectLog::new();
        let a = Endpoint::new("10.0.0.1", 7000);
        let b = Endpoint::new("10.0.0.2", 7000);
        assert!(log.first_seen(&a));
        assert!(!log.first_seen(&a));
        assert!(log.first_seen(&b));
        assert_eq!(log.len(), 2);
    }
}
