//! Distinguished names with normalizing comparison.
//!
//! Two DN strings that differ only in case or in whitespace around RDN
//! separators denote the same entry. All equality, hashing and ordering in
//! this workspace goes through the normalized form; the text the caller
//! supplied is kept for display.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// A distinguished name.
///
/// Equality is case- and whitespace-insensitive: `"dc=Example, dc=COM"` and
/// `"dc=example,dc=com"` compare equal and hash identically.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Dn {
    display: String,
    norm: String,
}

impl Dn {
    /// Build a DN from its string representation.
    pub fn new(dn: &str) -> Self {
        Self {
            display: dn.trim().to_string(),
            norm: normalize(dn),
        }
    }

    /// The DN as the caller wrote it (surrounding whitespace trimmed).
    pub fn as_str(&self) -> &str {
        &self.display
    }

    /// The normalized comparison form: lowercase, no whitespace around
    /// separators.
    pub fn normalized(&self) -> &str {
        &self.norm
    }

    /// True if `self` is the same entry as `base` or lies beneath it.
    pub fn is_under(&self, base: &Dn) -> bool {
        self.norm == base.norm || self.norm.ends_with(&format!(",{}", base.norm))
    }

    /// True if `self` is a direct child of `base`.
    pub fn is_child_of(&self, base: &Dn) -> bool {
        match self.norm.strip_suffix(&format!(",{}", base.norm)) {
            Some(rdn) => !rdn.is_empty() && split_rdns(rdn).count() == 1,
            None => false,
        }
    }

    /// The first RDN, normalized (e.g. `cn=servers` for
    /// `cn=Servers,cn=admin data`).
    pub fn rdn(&self) -> &str {
        self.norm.split(',').next().unwrap_or("")
    }
}

/// Splits a DN string on commas that are not escaped with a backslash.
fn split_rdns(dn: &str) -> impl Iterator<Item = &str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let bytes = dn.as_bytes();
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate() {
        if escaped {
            escaped = false;
        } else if b == b'\\' {
            escaped = true;
        } else if b == b',' {
            parts.push(&dn[start..i]);
            start = i + 1;
        }
    }
    parts.push(&dn[start..]);
    parts.into_iter()
}

fn normalize(dn: &str) -> String {
    let rdns: Vec<String> = split_rdns(dn.trim())
        .map(|rdn| {
            let rdn = rdn.trim();
            match rdn.split_once('=') {
                Some((attr, value)) => format!(
                    "{}={}",
                    attr.trim().to_lowercase(),
                    value.trim().to_lowercase()
                ),
                None => rdn.to_lowercase(),
            }
        })
        .collect();
    rdns.join(",")
}

impl PartialEq for Dn {
    fn eq(&self, other: &Self) -> bool {
        self.norm == other.norm
    }
}

impl Eq for Dn {}

impl Hash for Dn {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.norm.hash(state);
    }
}

impl PartialOrd for Dn {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Dn {
    fn cmp(&self, other: &Self) -> Ordering {
        self.norm.cmp(&other.norm)
    }
}

impl fmt::Display for Dn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display)
    }
}

impl From<String> for Dn {
    fn from(s: String) -> Self {
        Dn::new(&s)
    }
}

impl From<Dn> for String {
    fn from(dn: Dn) -> Self {
        dn.display
    }
}

impl From<&str> for Dn {
    fn from(s: &str) -> Self {
        Dn::new(s)
    }
}
