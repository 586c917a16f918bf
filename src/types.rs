use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Opaque key identifying a server node: its URL or a hash of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerIdentity(String);

impl ServerIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        ServerIdentity(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServerIdentity {
    fn from(s: &str) -> Self {
        ServerIdentity(s.to_string())
    }
}

impl From<String> for ServerIdentity {
    fn from(s: String) -> Self {
        ServerIdentity(s)
    }
}

impl Borrow<str> for ServerIdentity {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ServerIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
