use parking_lot::RwLock;
use regex::Regex;

/// A single blacklist entry, compiled once at insert time (§9) rather than
/// recompiled on every request.
#[derive(Debug, Clone)]
pub enum BlacklistPattern {
    Substring(String),
    Glob { source: String, regex: Regex },
}

impl BlacklistPattern {
    /// Compile `raw`: a pattern containing `*` becomes a glob (escape `.`,
    /// turn `*` into `.*`, case-insensitive); anything else is a plain
    /// case-insensitive substring match.
    pub fn compile(raw: &str) -> Self {
        if raw.contains('*') {
            let escaped = raw.replace('.', "\\.").replace('*', ".*");
            match Regex::new(&format!("(?i){escaped}")) {
                Ok(regex) => BlacklistPattern::Glob {
                    source: raw.to_string(),
                    regex,
                },
                Err(_) => BlacklistPattern::Substring(raw.to_string()),
            }
        } else {
            BlacklistPattern::Substring(raw.to_string())
        }
    }

    pub fn source(&self) -> &str {
        match self {
            BlacklistPattern::Substring(s) => s,
            BlacklistPattern::Glob { source, .. } => source,
        }
    }

    fn matches(&self, filename: &str) -> bool {
        match self {
            BlacklistPattern::Substring(s) => {
                filename.to_lowercase().contains(&s.to_lowercase())
            }
            BlacklistPattern::Glob { regex, .. } => regex.is_match(filename),
        }
    }
}

/// Ordered, in-memory blacklist. Mutations are expected to also be persisted
/// by the caller (the persistent store owns durability; this is the hot-path
/// read structure, matching the mirror registry's memory/store split).
#[derive(Default)]
pub struct Blacklist {
    patterns: RwLock<Vec<BlacklistPattern>>,
}

impl Blacklist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_patterns(raw: impl IntoIterator<Item = String>) -> Self {
        let patterns = raw.into_iter().map(|p| BlacklistPattern::compile(&p)).collect();
        Self {
            patterns: RwLock::new(patterns),
        }
    }

    pub fn replace_all(&self, raw: impl IntoIterator<Item = String>) {
        let patterns = raw.into_iter().map(|p| BlacklistPattern::compile(&p)).collect();
        *self.patterns.write() = patterns;
    }

    pub fn add(&self, raw: &str) {
        let mut patterns = self.patterns.write();
        if !patterns.iter().any(|p| p.source() == raw) {
            patterns.push(BlacklistPattern::compile(raw));
        }
    }

    pub fn remove(&self, raw: &str) -> bool {
        let mut patterns = self.patterns.write();
        let before = patterns.len();
        patterns.retain(|p| p.source() != raw);
        patterns.len() != before
    }

    pub fn patterns(&self) -> Vec<String> {
        self.patterns.read().iter().map(|p| p.source().to_string()).collect()
    }

    /// Case-insensitively test `filename` (the logical filename, see
    /// `cache_path::logical_filename`) against every pattern in insertion
    /// order; first match wins.
    pub fn matches(&self, filename: &str) -> bool {
        self.patterns.read().iter().any(|p| p.matches(filename))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substring_pattern_matches_case_insensitively() {
        let bl = Blacklist::from_patterns(["nvidia".to_string()]);
        assert!(bl.matches("NVIDIA-driver_535.deb"));
        assert!(!bl.matches("linux-image.deb"));
    }

    #[test]
    fn glob_pattern_matches_any_deb() {
        let bl = Blacklist::from_patterns(["*.deb".to_string()]);
        assert!(bl.matches("package.deb"));
        assert!(!bl.matches("package.rpm"));
    }

    #[test]
    fn glob_escapes_literal_dots() {
        // "a.b" should not match "axb" once '.' is escaped to a literal dot.
        let bl = Blacklist::from_patterns(["a.b*".to_string()]);
        assert!(bl.matches("a.b.deb"));
        assert!(!bl.matches("axb.deb"));
    }

    #[test]
    fn remove_drops_pattern() {
        let bl = Blacklist::from_patterns(["foo".to_string()]);
        assert!(bl.remove("foo"));
        assert!(!bl.matches("foobar"));
        assert!(!bl.remove("foo"));
    }

    #[test]
    fn add_is_idempotent() {
        let bl = Blacklist::new();
        bl.add("dup");
        bl.add("dup");
        assert_eq!(bl.patterns().len(), 1);
    }

    #[test]
    fn empty_blacklist_matches_nothing() {
        let bl = Blacklist::new();
        assert!(!bl.matches("anything.deb"));
    }
}
