use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A normalized, absolute, URL-style path naming one blob in a drive
///
/// Normalization drops empty and `.` segments, resolves `..` (never
/// climbing above the root) and strips trailing slashes, so two keys are
/// equal iff they name the same path. The root key is `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct StoreKey(String);

impl StoreKey {
    pub fn new(raw: &str) -> Self {
        let mut segments: Vec<&str> = Vec::new();
        for segment in raw.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                other => segments.push(other),
            }
        }
        StoreKey(format!("/{}", segments.join("/")))
    }

    pub fn root() -> Self {
        StoreKey("/".to_string())
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Join a relative path onto this key, like joining URL paths
    pub fn join(&self, relative: &str) -> Self {
        StoreKey::new(&format!("{}/{}", self.0, relative))
    }

    /// Whether `self` lies strictly below `prefix`
    ///
    /// With `recursive` unset only direct children count.
    pub fn is_under(&self, prefix: &StoreKey, recursive: bool) -> bool {
        let rest = if prefix.is_root() {
            match self.0.strip_prefix('/') {
                Some(rest) => rest,
                None => return false,
            }
        } else {
            match self
                .0
                .strip_prefix(prefix.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
            {
                Some(rest) => rest,
                None => return false,
            }
        };
        !rest.is_empty() && (recursive || !rest.contains('/'))
    }
}

impl Default for StoreKey {
    fn default() -> Self {
        Self::root()
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StoreKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StoreKey {
    fn from(raw: &str) -> Self {
        StoreKey::new(raw)
    }
}

impl From<String> for StoreKey {
    fn from(raw: String) -> Self {
        StoreKey::new(&raw)
    }
}

impl From<StoreKey> for String {
    fn from(key: StoreKey) -> Self {
        key.0
    }
}

impl FromStr for StoreKey {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(StoreKey::new(s))
    }
}
