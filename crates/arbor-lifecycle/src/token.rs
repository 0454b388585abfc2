//! Single-use breadcrumb navigation tokens
//!
//! A breadcrumb click arms a token for the tab; the next url change for that
//! tab consumes it and is treated as a cursor move rather than a new visit.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Default, Clone)]
pub struct BreadcrumbTokens {
    armed: Arc<Mutex<HashSet<String>>>,
}

impl BreadcrumbTokens {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&self, tab_id: &str) {
        self.armed.lock().insert(tab_id.to_string());
    }

    /// Take the token for `tab_id`. Only the first call after `arm` sees it.
    pub fn consume(&self, tab_id: &str) -> bool {
        self.armed.lock().remove(tab_id)
    }

    /// Forget a token whose tab went away before navigating.
    pub fn discard(&self, tab_id: &str) {
        self.armed.lock().remove(tab_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_is_consumed_once() {
        let tokens = BreadcrumbTokens::new();
        assert!(!tokens.consume("t1"));

        tokens.arm("t1");
        assert!(!tokens.consume("t2"));
        assert!(tokens.consume("t1"));
        assert!(!tokens.consume("t1"));
    }
}
