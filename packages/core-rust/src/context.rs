//! Call context: correlation metadata propagated alongside an exchange.
//!
//! A [`CallContext`] is created once per logical call and travels with the
//! exchange. When a call has to survive an asynchronous suspension it is
//! serialized to bytes ([`CallContext::to_bytes`]) and parked in a call-context
//! store under [`CallContext::key`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::BusError;
use crate::policy::AgreedPolicy;
use crate::qname::QName;

/// Which leg of a conversation a context instance describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    Request,
    Response,
}

/// Which side of a leg the local process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Sender,
    Receiver,
}

/// Exchange style of the operation a call targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CommunicationStyle {
    #[default]
    Oneway,
    RequestResponse,
    Notification,
    SolicitResponse,
}

/// Transport a participant is reached through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Transport {
    Http,
    Https,
    Jms,
    Local,
    #[default]
    Unknown,
}

impl Transport {
    /// Derives the transport from an address URI scheme.
    #[must_use]
    pub fn from_address(address: &str) -> Self {
        let scheme = address
            .split_once(':')
            .map_or("", |(scheme, _)| scheme)
            .to_ascii_lowercase();
        match scheme.as_str() {
            "http" => Self::Http,
            "https" => Self::Https,
            "jms" => Self::Jms,
            "local" | "vm" => Self::Local,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Http => "http",
            Self::Https => "https",
            Self::Jms => "jms",
            Self::Local => "local",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Unified identity of a call participant, independent of transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Participant {
    pub unified_id: String,
    pub name: Option<String>,
    pub transport: Transport,
}

impl Participant {
    pub fn new(unified_id: impl Into<String>, transport: Transport) -> Self {
        Self {
            unified_id: unified_id.into(),
            name: None,
            transport,
        }
    }
}

/// Correlation metadata of one logical call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallContext {
    pub message_id: String,
    pub correlation_id: String,
    pub provider_id: Option<String>,
    pub exchange_id: Option<String>,
    pub service: Option<QName>,
    pub operation: Option<String>,
    pub partner_operation: Option<String>,
    pub style: CommunicationStyle,
    pub scope: Option<Scope>,
    pub role: Option<Role>,
    pub participant: Option<Participant>,
    pub policy: Option<AgreedPolicy>,
    pub action: Option<String>,
}

impl CallContext {
    /// Creates an empty context with the given correlation pair.
    pub fn new(message_id: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            correlation_id: correlation_id.into(),
            provider_id: None,
            exchange_id: None,
            service: None,
            operation: None,
            partner_operation: None,
            style: CommunicationStyle::default(),
            scope: None,
            role: None,
            participant: None,
            policy: None,
            action: None,
        }
    }

    /// Starts a new conversation: fresh message id, correlated to itself.
    #[must_use]
    pub fn begin() -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        Self::new(id.clone(), id)
    }

    /// Storage key of this context. See [`context_key`].
    #[must_use]
    pub fn key(&self) -> String {
        context_key(&self.message_id, &self.correlation_id)
    }

    /// Serializes the context for a call-context store.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Infrastructure` if encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, BusError> {
        rmp_serde::to_vec_named(self).map_err(|e| {
            BusError::infrastructure(format!("cannot serialize call context {}", self.key()))
                .with_source(e)
        })
    }

    /// Restores a context serialized by [`CallContext::to_bytes`].
    ///
    /// # Errors
    ///
    /// Returns `BusError::Configuration` if the bytes do not hold a context
    /// this version can read.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BusError> {
        Self::from_reader(bytes)
    }

    /// Restores a context from a byte reader without buffering it first.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Configuration` if the stream does not hold a context
    /// this version can read.
    pub fn from_reader(reader: impl std::io::Read) -> Result<Self, BusError> {
        rmp_serde::from_read(reader).map_err(|e| {
            BusError::configuration("stored call context cannot be decoded").with_source(e)
        })
    }
}

/// Derives the store key of a context from its correlation pair.
///
/// The key is `message_id` followed by `correlation_id` with every `':'`
/// replaced by `'-'`. Two live calls sharing the same pair map to the same key
/// and overwrite each other in a store. The derivation is not injective either:
/// `("a:", "b")` and `("a", "-b")` yield the same key.
#[must_use]
pub fn context_key(message_id: &str, correlation_id: &str) -> String {
    let mut key = String::with_capacity(message_id.len() + correlation_id.len());
    key.push_str(message_id);
    key.push_str(correlation_id);
    key.replace(':', "-")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::error::ErrorKind;
    use crate::policy::Assertion;

    fn sample_context() -> CallContext {
        let mut ctx = CallContext::new("urn:uuid:1b4e", "urn:uuid:9f21");
        ctx.provider_id = Some("node-a".into());
        ctx.exchange_id = Some("ex-1".into());
        ctx.service = Some(QName::new("urn:acme", "Billing"));
        ctx.operation = Some("pay".into());
        ctx.partner_operation = Some("payCallback".into());
        ctx.style = CommunicationStyle::RequestResponse;
        ctx.scope = Some(Scope::Request);
        ctx.role = Some(Role::Sender);
        ctx.participant = Some(Participant::new("consumer-7", Transport::Https));
        ctx.policy = Some(
            AgreedPolicy::new("p-1", QName::new("urn:acme", "Billing")).with_assertion(
                Assertion::Encryption {
                    algorithm: "aes256-gcm".into(),
                },
            ),
        );
        ctx.action = Some("urn:acme:pay".into());
        ctx
    }

    #[test]
    fn key_replaces_colons() {
        let ctx = sample_context();
        assert_eq!(ctx.key(), "urn-uuid-1b4eurn-uuid-9f21");
    }

    #[test]
    fn identical_pairs_collide() {
        let a = CallContext::new("m:1", "c:1");
        let mut b = CallContext::new("m:1", "c:1");
        b.operation = Some("other".into());
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn bytes_round_trip_every_field() {
        let ctx = sample_context();
        let bytes = ctx.to_bytes().unwrap();
        assert_eq!(CallContext::from_bytes(&bytes).unwrap(), ctx);
    }

    #[test]
    fn garbage_bytes_are_configuration_errors() {
        let err = CallContext::from_bytes(b"\xc1\xc1\xc1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn begin_correlates_to_itself() {
        let ctx = CallContext::begin();
        assert_eq!(ctx.message_id, ctx.correlation_id);
        assert!(ctx.scope.is_none());
    }

    #[test]
    fn transport_from_address() {
        assert_eq!(Transport::from_address("https://acme.org/ws"), Transport::Https);
        assert_eq!(Transport::from_address("JMS:queue/orders"), Transport::Jms);
        assert_eq!(Transport::from_address("local:billing"), Transport::Local);
        assert_eq!(Transport::from_address("ftp://x"), Transport::Unknown);
        assert_eq!(Transport::from_address("no-scheme"), Transport::Unknown);
    }

    proptest! {
        #[test]
        fn key_is_a_pure_function_of_the_pair(m in ".{0,24}", c in ".{0,24}") {
            let first = context_key(&m, &c);
            prop_assert_eq!(&first, &context_key(&m, &c));
            prop_assert!(!first.contains(':'));
            prop_assert_eq!(first.chars().count(), m.chars().count() + c.chars().count());
        }

        #[test]
        fn context_bytes_round_trip(m in "[a-z0-9:]{1,16}", c in "[a-z0-9:]{1,16}", op in proptest::option::of("[a-zA-Z]{1,8}")) {
            let mut ctx = CallContext::new(m, c);
            ctx.operation = op;
            let decoded = CallContext::from_bytes(&ctx.to_bytes().unwrap()).unwrap();
            prop_assert_eq!(decoded, ctx);
        }
    }
}
