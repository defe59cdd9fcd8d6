//! Directory entries and attribute modifications.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::dn::Dn;

/// A directory entry: a DN plus a set of multi-valued attributes.
///
/// Attribute names are case-insensitive; they are stored lowercased.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// The entry's distinguished name.
    pub dn: Dn,
    attrs: BTreeMap<String, BTreeSet<String>>,
}

impl Entry {
    /// Create an empty entry at the given DN.
    pub fn new(dn: Dn) -> Self {
        Self {
            dn,
            attrs: BTreeMap::new(),
        }
    }

    /// Builder-style: add one attribute value and return the entry.
    pub fn with_attr(mut self, name: &str, value: &str) -> Self {
        self.add_value(name, value);
        self
    }

    /// Builder-style: add several values for one attribute.
    pub fn with_values<I, S>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set = self.attrs.entry(name.to_lowercase()).or_default();
        for v in values {
            set.insert(v.into());
        }
        self
    }

    /// Add a single value to an attribute.
    pub fn add_value(&mut self, name: &str, value: &str) {
        self.attrs
            .entry(name.to_lowercase())
            .or_default()
            .insert(value.to_string());
    }

    /// Replace all values of an attribute. An empty value set removes it.
    pub fn set_values<I, S>(&mut self, name: &str, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set: BTreeSet<String> = values.into_iter().map(Into::into).collect();
        if set.is_empty() {
            self.attrs.remove(&name.to_lowercase());
        } else {
            self.attrs.insert(name.to_lowercase(), set);
        }
    }

    /// Remove an attribute entirely.
    pub fn remove_attr(&mut self, name: &str) {
        self.attrs.remove(&name.to_lowercase());
    }

    /// The first value of an attribute, if present.
    pub fn first(&self, name: &str) -> Option<&str> {
        self.attrs
            .get(&name.to_lowercase())
            .and_then(|v| v.iter().next().map(String::as_str))
    }

    /// All values of an attribute (empty if absent).
    pub fn values(&self, name: &str) -> Vec<&str> {
        self.attrs
            .get(&name.to_lowercase())
            .map(|v| v.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// True if the attribute carries the given value, comparing
    /// case-insensitively.
    pub fn has_value_ignore_case(&self, name: &str, value: &str) -> bool {
        self.values(name)
            .iter()
            .any(|v| v.eq_ignore_ascii_case(value))
    }

    /// True if the attribute is present with at least one value.
    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs.contains_key(&name.to_lowercase())
    }

    /// Apply a list of modifications in order.
    pub fn apply(&mut self, changes: &[AttrChange]) {
        for change in changes {
            match change {
                AttrChange::Replace { name, values } => {
                    self.set_values(name, values.iter().cloned())
                }
                AttrChange::Add { name, values } => {
                    for v in values {
                        self.add_value(name, v);
                    }
                }
                AttrChange::Delete { name } => self.remove_attr(name),
            }
        }
    }
}

/// A single attribute modification, as sent to
/// [`DirectoryConnection::modify`](crate::conn::DirectoryConnection::modify).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttrChange {
    /// Replace all values of the attribute.
    Replace {
        /// Attribute name.
        name: String,
        /// New value set; empty removes the attribute.
        values: Vec<String>,
    },
    /// Add values to the attribute.
    Add {
        /// Attribute name.
        name: String,
        /// Values to add.
        values: Vec<String>,
    },
    /// Remove the attribute entirely.
    Delete {
        /// Attribute name.
        name: String,
    },
}

impl AttrChange {
    /// Convenience constructor for a replace.
    pub fn replace<I, S>(name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        AttrChange::Replace {
            name: name.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}
