use std::collections::BTreeSet;

/// Local targets the bridge may ask this agent to open
///
/// An empty list allows every target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowedTargets {
    targets: BTreeSet<String>,
}

impl AllowedTargets {
    /// Parse a comma separated list, trimming whitespace around each entry
    pub fn parse(list: &str) -> Self {
        Self::from_entries(list.split(','))
    }

    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let targets = entries
            .into_iter()
            .map(|entry| entry.as_ref().trim().to_string())
            .filter(|entry| !entry.is_empty())
            .collect();

        Self { targets }
    }

    pub fn is_allowed(&self, target: &str) -> bool {
        self.targets.is_empty() || self.targets.contains(target.trim())
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.targets.iter().map(String::as_str)
    }
}
