//! Display data: the key/value description a connector reports to the host
//! for diagnostics. Secrets never appear here.

use std::fmt;
use std::time::Duration;

/// Whole milliseconds in `duration`, saturating at `u64::MAX`
pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// One display entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayItem {
    /// Entry key, e.g. `query`
    pub key: String,
    /// Rendered value
    pub value: String,
}

/// Ordered collection of display entries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplayData {
    items: Vec<DisplayItem>,
}

impl DisplayData {
    /// Create empty display data
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry, replacing an existing one with the same key
    pub fn add(&mut self, key: impl Into<String>, value: impl fmt::Display) -> &mut Self {
        let key = key.into();
        let value = value.to_string();
        match self.items.iter_mut().find(|item| item.key == key) {
            Some(item) => item.value = value,
            None => self.items.push(DisplayItem { key, value }),
        }
        self
    }

    /// Add an entry only when a value is present
    pub fn add_if_some<V: fmt::Display>(
        &mut self,
        key: impl Into<String>,
        value: Option<V>,
    ) -> &mut Self {
        if let Some(value) = value {
            self.add(key, value);
        }
        self
    }

    /// Look up an entry by key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.items
            .iter()
            .find(|item| item.key == key)
            .map(|item| item.value.as_str())
    }

    /// All entries in insertion order
    pub fn items(&self) -> &[DisplayItem] {
        &self.items
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether there are no entries
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl fmt::Display for DisplayData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, item) in self.items.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", item.key, item.value)?;
        }
        Ok(())
    }
}
