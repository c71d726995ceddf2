//! Channel keys and glob patterns.
//!
//! A subscription targets either a literal channel name, compared exactly,
//! or a pattern matched against every published channel name. Patterns use
//! glob syntax: `*` matches any run of characters (including none), `?`
//! matches one character, `[...]` matches a class and `\` escapes.

use std::fmt;

use globset::{GlobBuilder, GlobMatcher};

use super::HubError;

/// A channel name plus its match mode.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelKey {
    name: String,
    is_pattern: bool,
}

impl ChannelKey {
    /// Literal channel, compared exactly.
    #[must_use]
    pub fn exact(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_pattern: false,
        }
    }

    /// Glob pattern channel.
    #[must_use]
    pub fn pattern(pattern: impl Into<String>) -> Self {
        Self {
            name: pattern.into(),
            is_pattern: true,
        }
    }

    /// Builds a key from a name and a match-mode flag.
    #[must_use]
    pub fn new(name: impl Into<String>, is_pattern: bool) -> Self {
        Self {
            name: name.into(),
            is_pattern,
        }
    }

    /// Channel name or pattern text.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `true` for pattern subscriptions.
    #[must_use]
    pub const fn is_pattern(&self) -> bool {
        self.is_pattern
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_pattern {
            write!(f, "pattern:{}", self.name)
        } else {
            write!(f, "{}", self.name)
        }
    }
}

/// A compiled channel pattern.
#[derive(Debug, Clone)]
pub struct ChannelPattern {
    text: String,
    matcher: GlobMatcher,
}

impl ChannelPattern {
    /// Compiles `pattern`.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::InvalidPattern`] if the glob does not parse.
    pub fn compile(pattern: &str) -> Result<Self, HubError> {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(false)
            .backslash_escape(true)
            .build()
            .map_err(|e| HubError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.kind().to_string(),
            })?;
        Ok(Self {
            text: pattern.to_string(),
            matcher: glob.compile_matcher(),
        })
    }

    /// Pattern source text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Returns `true` if `channel` matches.
    #[must_use]
    pub fn matches(&self, channel: &str) -> bool {
        self.matcher.is_match(channel)
    }
}
