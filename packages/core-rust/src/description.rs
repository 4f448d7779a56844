//! Operation metadata resolved from a service description.
//!
//! [`OperationDescription`] is read-mostly: it is produced by a service
//! description resolver and cached by callers keyed by operation name.

use serde::{Deserialize, Serialize};

use crate::context::CommunicationStyle;
use crate::error::BusError;
use crate::qname::QName;

/// Message exchange pattern of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExchangePattern {
    InOnly,
    InOut,
    OutOnly,
    OutIn,
}

const MEP_2004: &str = "http://www.w3.org/2004/08/wsdl/";
const MEP_2006: &str = "http://www.w3.org/ns/wsdl/";

impl ExchangePattern {
    /// Canonical WSDL 2.0 pattern URI.
    #[must_use]
    pub fn uri(self) -> &'static str {
        match self {
            Self::InOnly => "http://www.w3.org/2004/08/wsdl/in-only",
            Self::InOut => "http://www.w3.org/2004/08/wsdl/in-out",
            Self::OutOnly => "http://www.w3.org/2004/08/wsdl/out-only",
            Self::OutIn => "http://www.w3.org/2004/08/wsdl/out-in",
        }
    }

    /// Parses a pattern URI (2004/08 or 2006/01 namespace) or a bare pattern name.
    ///
    /// # Errors
    ///
    /// Returns `BusError::IllegalInput` for an unknown pattern.
    pub fn from_uri(uri: &str) -> Result<Self, BusError> {
        let name = uri
            .strip_prefix(MEP_2004)
            .or_else(|| uri.strip_prefix(MEP_2006))
            .unwrap_or(uri);
        match name.to_ascii_lowercase().as_str() {
            "in-only" => Ok(Self::InOnly),
            "in-out" => Ok(Self::InOut),
            "out-only" => Ok(Self::OutOnly),
            "out-in" => Ok(Self::OutIn),
            _ => Err(BusError::illegal_input(format!(
                "unknown message exchange pattern `{uri}`"
            ))),
        }
    }

    /// Whether a reply travels back on the same exchange.
    #[must_use]
    pub fn expects_reply(self) -> bool {
        matches!(self, Self::InOut | Self::OutIn)
    }

    #[must_use]
    pub fn communication_style(self) -> CommunicationStyle {
        match self {
            Self::InOnly => CommunicationStyle::Oneway,
            Self::InOut => CommunicationStyle::RequestResponse,
            Self::OutOnly => CommunicationStyle::Notification,
            Self::OutIn => CommunicationStyle::SolicitResponse,
        }
    }
}

/// Metadata of one operation of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationDescription {
    pub name: QName,
    pub pattern: ExchangePattern,
    /// Protocol action (e.g. SOAP action) advertised for the operation.
    pub action: Option<String>,
    /// Callback operation that answers this one asynchronously.
    pub partner_operation: Option<QName>,
    /// Set when this operation is itself the callback of another operation.
    pub callback_of: Option<QName>,
    /// Whether the operation declares a default fault.
    pub default_fault: bool,
}

impl OperationDescription {
    #[must_use]
    pub fn new(name: QName, pattern: ExchangePattern) -> Self {
        Self {
            name,
            pattern,
            action: None,
            partner_operation: None,
            callback_of: None,
            default_fault: false,
        }
    }

    #[must_use]
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    #[must_use]
    pub fn with_partner(mut self, partner: QName) -> Self {
        self.partner_operation = Some(partner);
        self
    }

    #[must_use]
    pub fn as_callback_of(mut self, operation: QName) -> Self {
        self.callback_of = Some(operation);
        self
    }

    /// Whether the operation is a partner (callback) operation.
    #[must_use]
    pub fn is_partner_operation(&self) -> bool {
        self.callback_of.is_some()
    }

    #[must_use]
    pub fn communication_style(&self) -> CommunicationStyle {
        self.pattern.communication_style()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_uris_round_trip() {
        for pattern in [
            ExchangePattern::InOnly,
            ExchangePattern::InOut,
            ExchangePattern::OutOnly,
            ExchangePattern::OutIn,
        ] {
            assert_eq!(ExchangePattern::from_uri(pattern.uri()).unwrap(), pattern);
        }
    }

    #[test]
    fn accepts_2006_namespace_and_bare_names() {
        assert_eq!(
            ExchangePattern::from_uri("http://www.w3.org/ns/wsdl/in-out").unwrap(),
            ExchangePattern::InOut
        );
        assert_eq!(
            ExchangePattern::from_uri("In-Only").unwrap(),
            ExchangePattern::InOnly
        );
        assert!(ExchangePattern::from_uri("http://www.w3.org/ns/wsdl/robust-in-only").is_err());
    }

    #[test]
    fn communication_style_follows_pattern() {
        assert_eq!(
            ExchangePattern::InOnly.communication_style(),
            CommunicationStyle::Oneway
        );
        assert_eq!(
            ExchangePattern::InOut.communication_style(),
            CommunicationStyle::RequestResponse
        );
        assert_eq!(
            ExchangePattern::OutOnly.communication_style(),
            CommunicationStyle::Notification
        );
        assert_eq!(
            ExchangePattern::OutIn.communication_style(),
            CommunicationStyle::SolicitResponse
        );
    }

    #[test]
    fn callback_operations_are_partner_operations() {
        let request = OperationDescription::new(QName::local("order"), ExchangePattern::InOnly)
            .with_partner(QName::local("orderCallback"));
        let callback =
            OperationDescription::new(QName::local("orderCallback"), ExchangePattern::InOnly)
                .as_callback_of(QName::local("order"));
        assert!(!request.is_partner_operation());
        assert!(callback.is_partner_operation());
    }
}
