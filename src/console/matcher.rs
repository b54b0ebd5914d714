use regex::Regex;
use std::sync::Arc;

/// Predicate deciding whether a console line answers a command.
///
/// Lines are handed over ANSI-stripped and trimmed. Matchers for commands
/// that may be in flight together must not accept each other's lines; the
/// correlator can only warn when they do.
pub trait LineMatcher: Send + Sync {
    fn matches(&self, line: &str) -> bool;

    fn describe(&self) -> String;
}

pub type SharedMatcher = Arc<dyn LineMatcher>;

pub struct PatternMatcher {
    regex: Regex,
}

impl PatternMatcher {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            regex: Regex::new(pattern)?,
        })
    }

    pub fn from_regex(regex: Regex) -> Self {
        Self { regex }
    }
}

impl LineMatcher for PatternMatcher {
    fn matches(&self, line: &str) -> bool {
        self.regex.is_match(line)
    }

    fn describe(&self) -> String {
        format!("regex /{}/", self.regex.as_str())
    }
}

pub struct ContainsMatcher {
    needle: String,
}

impl ContainsMatcher {
    pub fn new(needle: impl Into<String>) -> Self {
        Self { needle: needle.into() }
    }
}

impl LineMatcher for ContainsMatcher {
    fn matches(&self, line: &str) -> bool {
        line.contains(&self.needle)
    }

    fn describe(&self) -> String {
        format!("contains {:?}", self.needle)
    }
}

pub struct FnMatcher<F> {
    label: String,
    predicate: F,
}

impl<F> FnMatcher<F>
where
    F: Fn(&str) -> bool + Send + Sync,
{
    pub fn new(label: impl Into<String>, predicate: F) -> Self {
        Self {
            label: label.into(),
            predicate,
        }
    }
}

impl<F> LineMatcher for FnMatcher<F>
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn matches(&self, line: &str) -> bool {
        (self.predicate)(line)
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}
