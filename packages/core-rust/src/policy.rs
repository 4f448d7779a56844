//! Negotiated quality-of-service contracts.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::qname::QName;

/// A single QoS requirement of an agreed policy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Assertion {
    /// Message content must be encrypted with the given algorithm.
    Encryption { algorithm: String },
    /// Exchanges must be tracked at the given level.
    Tracking { level: String },
    /// Consumers must authenticate with the given mechanism.
    Authentication { mechanism: String },
}

impl Assertion {
    /// Short name used to select interceptors.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Encryption { .. } => "encryption",
            Self::Tracking { .. } => "tracking",
            Self::Authentication { .. } => "authentication",
        }
    }
}

/// The negotiated QoS contract for a service.
///
/// Service-wide assertions apply to every operation; per-operation assertions
/// only to the named operation (keyed by local name).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgreedPolicy {
    pub id: String,
    pub service: QName,
    pub assertions: Vec<Assertion>,
    pub operation_assertions: BTreeMap<String, Vec<Assertion>>,
}

impl AgreedPolicy {
    pub fn new(id: impl Into<String>, service: QName) -> Self {
        Self {
            id: id.into(),
            service,
            assertions: Vec::new(),
            operation_assertions: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_assertion(mut self, assertion: Assertion) -> Self {
        self.assertions.push(assertion);
        self
    }

    #[must_use]
    pub fn with_operation_assertion(mut self, operation: &str, assertion: Assertion) -> Self {
        self.operation_assertions
            .entry(operation.to_string())
            .or_default()
            .push(assertion);
        self
    }

    /// Reduces the policy to what applies to a single operation.
    ///
    /// The result carries the service-wide assertions followed by the
    /// operation's own, and no other per-operation entries.
    #[must_use]
    pub fn reduce_to_operation(&self, operation: &str) -> Self {
        let mut assertions = self.assertions.clone();
        if let Some(own) = self.operation_assertions.get(operation) {
            for assertion in own {
                if !assertions.contains(assertion) {
                    assertions.push(assertion.clone());
                }
            }
        }
        Self {
            id: self.id.clone(),
            service: self.service.clone(),
            assertions,
            operation_assertions: BTreeMap::new(),
        }
    }

    /// Whether any assertion with the given name applies service-wide.
    #[must_use]
    pub fn requires(&self, assertion_name: &str) -> bool {
        self.assertions.iter().any(|a| a.name() == assertion_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> AgreedPolicy {
        AgreedPolicy::new("p-1", QName::new("urn:acme", "Billing"))
            .with_assertion(Assertion::Tracking {
                level: "full".into(),
            })
            .with_operation_assertion(
                "pay",
                Assertion::Encryption {
                    algorithm: "aes256-gcm".into(),
                },
            )
            .with_operation_assertion(
                "refund",
                Assertion::Authentication {
                    mechanism: "saml".into(),
                },
            )
    }

    #[test]
    fn reduction_keeps_service_wide_and_own_assertions() {
        let reduced = policy().reduce_to_operation("pay");
        assert!(reduced.requires("tracking"));
        assert!(reduced.requires("encryption"));
        assert!(!reduced.requires("authentication"));
        assert!(reduced.operation_assertions.is_empty());
    }

    #[test]
    fn reduction_for_unlisted_operation_keeps_service_wide_only() {
        let reduced = policy().reduce_to_operation("status");
        assert_eq!(reduced.assertions.len(), 1);
        assert!(reduced.requires("tracking"));
    }

    #[test]
    fn reduction_is_idempotent() {
        let once = policy().reduce_to_operation("pay");
        assert_eq!(once.reduce_to_operation("pay"), once);
    }
}
