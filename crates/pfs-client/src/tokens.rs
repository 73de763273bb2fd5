//! Local mirror of the tokens this client holds.

use std::collections::HashMap;

use pfs_msg::TokenMode;

/// One locally held byte-range token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LocalToken {
    pub mode: TokenMode,
    pub start: u64,
    pub end: u64,
}

impl LocalToken {
    fn overlaps(&self, start: u64, end: u64) -> bool {
        self.end >= start && self.start <= end
    }

    fn touches(&self, start: u64, end: u64) -> bool {
        self.start <= end.saturating_add(1) && start <= self.end.saturating_add(1)
    }
}

/// Per-file interval set of held tokens, mutated in lockstep with the
/// metadata service: grants insert, revocations split.
#[derive(Default)]
pub(crate) struct TokenSet {
    files: HashMap<String, Vec<LocalToken>>,
}

impl TokenSet {
    /// Whether `[start, end]` is fully covered. A write requires WRITE
    /// tokens; a read is satisfied by tokens of either mode.
    pub fn covers(&self, name: &str, start: u64, end: u64, for_write: bool) -> bool {
        let Some(tokens) = self.files.get(name) else {
            return false;
        };

        let mut qualifying: Vec<&LocalToken> = tokens
            .iter()
            .filter(|t| !for_write || t.mode == TokenMode::Write)
            .collect();
        qualifying.sort_by_key(|t| t.start);

        // Sweep: extend the covered prefix token by token; a gap fails.
        let mut next_uncovered = start;
        for token in qualifying {
            if next_uncovered > end {
                break;
            }
            if token.start > next_uncovered {
                return false;
            }
            if token.end >= next_uncovered {
                next_uncovered = token.end.saturating_add(1);
            }
        }
        next_uncovered > end
    }

    /// Strongest mode covering the whole of `[start, end]`, if any.
    pub fn mode_over(&self, name: &str, start: u64, end: u64) -> Option<TokenMode> {
        if self.covers(name, start, end, true) {
            Some(TokenMode::Write)
        } else if self.covers(name, start, end, false) {
            Some(TokenMode::Read)
        } else {
            None
        }
    }

    /// Records a grant, merging same-mode tokens it overlaps or abuts.
    pub fn grant(&mut self, name: &str, mode: TokenMode, start: u64, end: u64) {
        let tokens = self.files.entry(name.to_string()).or_default();
        let mut merged = LocalToken { mode, start, end };
        tokens.retain(|t| {
            if t.mode == merged.mode && t.touches(merged.start, merged.end) {
                merged.start = merged.start.min(t.start);
                merged.end = merged.end.max(t.end);
                false
            } else {
                true
            }
        });
        tokens.push(merged);
    }

    /// Applies a revocation: every token intersecting `[start, end]` loses
    /// the overlap, keeping its prefix and/or suffix. This mirrors the
    /// carve the metadata service performed on its side.
    pub fn revoke(&mut self, name: &str, start: u64, end: u64) {
        let Some(tokens) = self.files.get_mut(name) else {
            return;
        };

        let mut kept = Vec::with_capacity(tokens.len());
        for token in tokens.drain(..) {
            if !token.overlaps(start, end) {
                kept.push(token);
                continue;
            }
            if token.start < start {
                kept.push(LocalToken {
                    end: start - 1,
                    ..token.clone()
                });
            }
            if token.end > end {
                kept.push(LocalToken {
                    start: end + 1,
                    ..token
                });
            }
        }
        *tokens = kept;

        if self.files.get(name).is_some_and(|t| t.is_empty()) {
            self.files.remove(name);
        }
    }

    /// Drops every token held on the file (close path).
    pub fn remove_file(&mut self, name: &str) {
        self.files.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_covers_single_token() {
        let mut set = TokenSet::default();
        set.grant("f", TokenMode::Read, 10, 99);

        assert!(set.covers("f", 10, 99, false));
        assert!(set.covers("f", 50, 60, false));
        assert!(!set.covers("f", 0, 10, false));
        assert!(!set.covers("f", 90, 100, false));
        assert!(!set.covers("g", 10, 99, false));
    }

    #[test]
    fn test_write_coverage_requires_write_mode() {
        let mut set = TokenSet::default();
        set.grant("f", TokenMode::Read, 0, 99);

        assert!(set.covers("f", 0, 99, false));
        assert!(!set.covers("f", 0, 99, true));
        assert_eq!(set.mode_over("f", 0, 99), Some(TokenMode::Read));

        set.grant("f", TokenMode::Write, 0, 99);
        assert!(set.covers("f", 0, 99, true));
        assert_eq!(set.mode_over("f", 0, 99), Some(TokenMode::Write));
    }

    #[test]
    fn test_covers_across_adjacent_tokens() {
        let mut set = TokenSet::default();
        set.grant("f", TokenMode::Write, 0, 49);
        set.grant("f", TokenMode::Write, 50, 99);

        // Adjacent same-mode grants coalesce, so the whole range is covered.
        assert!(set.covers("f", 0, 99, true));
        assert!(set.covers("f", 25, 75, true));
    }

    #[test]
    fn test_covers_detects_gaps() {
        let mut set = TokenSet::default();
        set.grant("f", TokenMode::Read, 0, 9);
        set.grant("f", TokenMode::Read, 20, 29);

        assert!(!set.covers("f", 0, 29, false));
        assert!(set.covers("f", 0, 9, false));
        assert!(set.covers("f", 20, 29, false));
    }

    #[test]
    fn test_revoke_splits_token() {
        let mut set = TokenSet::default();
        set.grant("f", TokenMode::Write, 0, 99);
        set.revoke("f", 50, 99);

        assert!(set.covers("f", 0, 49, true));
        assert!(!set.covers("f", 50, 50, false));

        set.grant("f", TokenMode::Write, 200, 299);
        set.revoke("f", 240, 259);
        assert!(set.covers("f", 200, 239, true));
        assert!(set.covers("f", 260, 299, true));
        assert!(!set.covers("f", 240, 259, false));
    }

    #[test]
    fn test_revoke_unknown_range_is_noop() {
        let mut set = TokenSet::default();
        set.revoke("f", 0, 10);
        set.grant("f", TokenMode::Read, 0, 9);
        set.revoke("f", 100, 200);
        assert!(set.covers("f", 0, 9, false));
    }
}
