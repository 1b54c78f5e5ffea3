//! Ordered, case-insensitive name/value map shared by headers and parameters.

use std::{
    collections::{hash_map::Entry, HashMap},
    fmt, mem,
};

/// Ordered map with ASCII case-insensitive keys.
///
/// Used for request headers, query parameters, url-encoded form bodies and
/// response headers. Entries keep insertion order, which is the order
/// response headers are written in. Inserting an existing name (in any case)
/// replaces the entry in place, so the map never holds two entries for one
/// name.
///
/// # Examples
/// ```
/// use relay_web::FieldMap;
///
/// let mut headers = FieldMap::new();
/// headers.insert("Content-Type", "text/html");
///
/// assert_eq!(headers.get("content-type"), Some("text/html"));
/// assert_eq!(headers.get("CONTENT-TYPE"), Some("text/html"));
///
/// headers.insert("content-type", "application/json");
/// assert_eq!(headers.len(), 1);
/// assert_eq!(headers.get("Content-Type"), Some("application/json"));
/// ```
#[derive(Clone, Default, PartialEq, Eq)]
pub struct FieldMap {
    entries: Vec<(String, String)>,
    /// Lower-cased name to position in `entries`.
    index: HashMap<String, usize>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the entry for `name`.
    ///
    /// Returns the previous value if the name was already present. A
    /// replaced entry keeps its position and takes the casing of `name`.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let name = name.into();
        let value = value.into();

        match self.index.entry(name.to_ascii_lowercase()) {
            Entry::Occupied(slot) => {
                let entry = &mut self.entries[*slot.get()];
                entry.0 = name;
                Some(mem::replace(&mut entry.1, value))
            }
            Entry::Vacant(slot) => {
                slot.insert(self.entries.len());
                self.entries.push((name, value));
                None
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|index| self.entries[index].1.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Compares the value stored under `name` with `expected`, ignoring ASCII case.
    pub fn value_eq(&self, name: &str, expected: &str) -> bool {
        self.get(name)
            .is_some_and(|value| value.eq_ignore_ascii_case(expected))
    }

    /// Removes the entry for `name`. Later entries shift down by one.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        let removed = self.index.remove(&name.to_ascii_lowercase())?;

        for position in self.index.values_mut() {
            if *position > removed {
                *position -= 1;
            }
        }
        Some(self.entries.remove(removed).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }

    /// Iterates over entries in insertion order, with names as inserted.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    #[inline]
    fn position(&self, name: &str) -> Option<usize> {
        match name.bytes().any(|b| b.is_ascii_uppercase()) {
            true => self.index.get(&name.to_ascii_lowercase()).copied(),
            false => self.index.get(name).copied(),
        }
    }
}

impl fmt::Debug for FieldMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for FieldMap {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut map = FieldMap::new();
        map.extend(iter);
        map
    }
}

impl<N: Into<String>, V: Into<String>> Extend<(N, V)> for FieldMap {
    fn extend<I: IntoIterator<Item = (N, V)>>(&mut self, iter: I) {
        for (name, value) in iter {
            self.insert(name, value);
        }
    }
}
