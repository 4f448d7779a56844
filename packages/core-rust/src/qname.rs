//! Qualified names used to identify services, interfaces and operations.
//!
//! The textual form is the Clark notation `{namespace}local`; a name without a
//! namespace is written as the bare local part.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BusError;

/// A namespace-qualified name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QName {
    pub namespace: String,
    pub local: String,
}

impl QName {
    pub fn new(namespace: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            local: local.into(),
        }
    }

    /// A name with an empty namespace.
    pub fn local(local: impl Into<String>) -> Self {
        Self::new(String::new(), local)
    }

    /// Parses `{namespace}local` or a bare `local`.
    ///
    /// # Errors
    ///
    /// Returns `BusError::IllegalInput` for unbalanced braces or an empty local part.
    pub fn parse(text: &str) -> Result<Self, BusError> {
        let (namespace, local) = if let Some(rest) = text.strip_prefix('{') {
            let Some((ns, local)) = rest.split_once('}') else {
                return Err(BusError::illegal_input(format!(
                    "unterminated namespace in qualified name `{text}`"
                )));
            };
            (ns, local)
        } else {
            ("", text)
        };

        if local.is_empty() || local.contains(['{', '}']) {
            return Err(BusError::illegal_input(format!(
                "invalid local part in qualified name `{text}`"
            )));
        }

        Ok(Self::new(namespace, local))
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            f.write_str(&self.local)
        } else {
            write!(f, "{{{}}}{}", self.namespace, self.local)
        }
    }
}

impl FromStr for QName {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
