//! Message exchanges: the envelopes moving through the bus.
//!
//! An [`Exchange`] is owned by exactly one party at a time. It starts
//! `Active` and must reach a terminal status (`Done` or `Error`) exactly once;
//! the terminal transition helpers enforce that.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::context::CallContext;
use crate::description::ExchangePattern;
use crate::error::{BusError, ErrorKind};
use crate::qname::QName;

/// Name of the request message slot.
pub const IN: &str = "in";
/// Name of the response message slot.
pub const OUT: &str = "out";

// ---------------------------------------------------------------------------
// Identifiers and discriminators
// ---------------------------------------------------------------------------

/// Opaque exchange identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExchangeId(pub String);

impl ExchangeId {
    /// Generates a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The role this side plays in an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExchangeRole {
    /// This side initiated the exchange.
    Consumer,
    /// This side is the target of the exchange.
    Provider,
}

impl ExchangeRole {
    /// The role the other side of the exchange plays.
    #[must_use]
    pub fn peer(self) -> Self {
        match self {
            Self::Consumer => Self::Provider,
            Self::Provider => Self::Consumer,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExchangeStatus {
    Active,
    Done,
    Error,
}

impl ExchangeStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }
}

/// Service endpoint an exchange is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointRef {
    pub service: QName,
    pub endpoint: String,
}

impl EndpointRef {
    pub fn new(service: QName, endpoint: impl Into<String>) -> Self {
        Self {
            service,
            endpoint: endpoint.into(),
        }
    }
}

impl fmt::Display for EndpointRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.service, self.endpoint)
    }
}

// ---------------------------------------------------------------------------
// Content
// ---------------------------------------------------------------------------

/// Representation of a message payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    /// Parsed document tree.
    Tree(serde_json::Value),
    /// Raw serialized bytes.
    Stream(Bytes),
    /// A representation the runtime cannot convert; the string names it.
    Unsupported(String),
}

impl Content {
    /// Converts a parsed tree to its serialized form.
    ///
    /// # Errors
    ///
    /// Returns `BusError::IllegalInput` if the tree cannot be serialized.
    pub fn tree_to_stream(tree: &serde_json::Value) -> Result<Bytes, BusError> {
        serde_json::to_vec(tree).map(Bytes::from).map_err(|e| {
            BusError::illegal_input("message tree cannot be serialized").with_source(e)
        })
    }

    /// Parses serialized bytes into a tree.
    ///
    /// # Errors
    ///
    /// Returns `BusError::IllegalInput` if the bytes are not a well-formed document.
    pub fn stream_to_tree(stream: &[u8]) -> Result<serde_json::Value, BusError> {
        serde_json::from_slice(stream)
            .map_err(|e| BusError::illegal_input("message stream is not well formed").with_source(e))
    }

    /// Normalizes the content to the `Stream` form.
    ///
    /// # Errors
    ///
    /// Returns `BusError::IllegalInput` for `Unsupported` content or an
    /// unserializable tree.
    pub fn into_stream(self) -> Result<Self, BusError> {
        match self {
            Self::Stream(_) => Ok(self),
            Self::Tree(tree) => Self::tree_to_stream(&tree).map(Self::Stream),
            Self::Unsupported(kind) => Err(BusError::illegal_input(format!(
                "unsupported message content representation `{kind}`"
            ))),
        }
    }

    /// Normalizes the content to the `Tree` form.
    ///
    /// # Errors
    ///
    /// Returns `BusError::IllegalInput` for `Unsupported` content or malformed bytes.
    pub fn into_tree(self) -> Result<Self, BusError> {
        match self {
            Self::Tree(_) => Ok(self),
            Self::Stream(bytes) => Self::stream_to_tree(&bytes).map(Self::Tree),
            Self::Unsupported(kind) => Err(BusError::illegal_input(format!(
                "unsupported message content representation `{kind}`"
            ))),
        }
    }
}

/// A message slot payload with its protocol headers.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedMessage {
    pub content: Content,
    pub headers: BTreeMap<String, String>,
}

impl NormalizedMessage {
    #[must_use]
    pub fn new(content: Content) -> Self {
        Self {
            content,
            headers: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// A business fault returned by a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct Fault {
    pub code: Option<String>,
    pub reason: Option<String>,
    pub content: Content,
}

impl Fault {
    pub fn new(code: impl Into<String>, content: Content) -> Self {
        Self {
            code: Some(code.into()),
            reason: None,
            content,
        }
    }

    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code.as_deref().unwrap_or("fault"))?;
        if let Some(reason) = &self.reason {
            write!(f, " ({reason})")?;
        }
        Ok(())
    }
}

/// Transport-visible description of an error attached to an exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&BusError> for ExchangeFailure {
    fn from(err: &BusError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl fmt::Display for ExchangeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

// ---------------------------------------------------------------------------
// Exchange
// ---------------------------------------------------------------------------

/// A message envelope moving through the bus.
#[derive(Debug, Clone)]
pub struct Exchange {
    id: ExchangeId,
    role: ExchangeRole,
    status: ExchangeStatus,
    pattern: ExchangePattern,
    pub service: Option<QName>,
    pub operation: Option<QName>,
    pub endpoint: Option<EndpointRef>,
    pub action: Option<String>,
    messages: BTreeMap<String, NormalizedMessage>,
    fault: Option<Fault>,
    failure: Option<ExchangeFailure>,
    context: Option<CallContext>,
    pub properties: HashMap<String, String>,
}

impl Exchange {
    /// Creates an active exchange initiated by this side.
    #[must_use]
    pub fn new(pattern: ExchangePattern) -> Self {
        Self::with_id(ExchangeId::generate(), ExchangeRole::Consumer, pattern)
    }

    /// Creates an active exchange with an explicit identity and role.
    #[must_use]
    pub fn with_id(id: ExchangeId, role: ExchangeRole, pattern: ExchangePattern) -> Self {
        Self {
            id,
            role,
            status: ExchangeStatus::Active,
            pattern,
            service: None,
            operation: None,
            endpoint: None,
            action: None,
            messages: BTreeMap::new(),
            fault: None,
            failure: None,
            context: None,
            properties: HashMap::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &ExchangeId {
        &self.id
    }

    #[must_use]
    pub fn role(&self) -> ExchangeRole {
        self.role
    }

    /// Changes the role this side plays. Used by transports when an exchange
    /// crosses to the peer.
    pub fn set_role(&mut self, role: ExchangeRole) {
        self.role = role;
    }

    #[must_use]
    pub fn status(&self) -> ExchangeStatus {
        self.status
    }

    #[must_use]
    pub fn pattern(&self) -> ExchangePattern {
        self.pattern
    }

    // ----- message slots -----

    #[must_use]
    pub fn message(&self, slot: &str) -> Option<&NormalizedMessage> {
        self.messages.get(slot)
    }

    pub fn message_mut(&mut self, slot: &str) -> Option<&mut NormalizedMessage> {
        self.messages.get_mut(slot)
    }

    pub fn set_message(&mut self, slot: impl Into<String>, message: NormalizedMessage) {
        self.messages.insert(slot.into(), message);
    }

    pub fn take_message(&mut self, slot: &str) -> Option<NormalizedMessage> {
        self.messages.remove(slot)
    }

    /// Mutable access to every message slot and the fault content.
    pub fn contents_mut(&mut self) -> impl Iterator<Item = &mut Content> + '_ {
        self.messages
            .values_mut()
            .map(|m| &mut m.content)
            .chain(self.fault.as_mut().map(|f| &mut f.content))
    }

    #[must_use]
    pub fn fault(&self) -> Option<&Fault> {
        self.fault.as_ref()
    }

    pub fn set_fault(&mut self, fault: Fault) {
        self.fault = Some(fault);
    }

    /// Drops any half-built reply: the out slot and the fault.
    pub fn clear_reply(&mut self) {
        self.messages.remove(OUT);
        self.fault = None;
    }

    #[must_use]
    pub fn failure(&self) -> Option<&ExchangeFailure> {
        self.failure.as_ref()
    }

    // ----- call context -----

    #[must_use]
    pub fn context(&self) -> Option<&CallContext> {
        self.context.as_ref()
    }

    pub fn context_mut(&mut self) -> Option<&mut CallContext> {
        self.context.as_mut()
    }

    /// Attaches a context unless one is already live.
    ///
    /// # Errors
    ///
    /// Returns `BusError::ProtocolViolation` if the exchange already carries a context.
    pub fn attach_context(&mut self, context: CallContext) -> Result<&mut CallContext, BusError> {
        if self.context.is_some() {
            return Err(BusError::protocol_violation(format!(
                "exchange {} already carries a call context",
                self.id
            )));
        }
        Ok(self.context.insert(context))
    }

    // ----- terminal transitions -----

    /// Marks the exchange `Done`.
    ///
    /// # Errors
    ///
    /// Returns `BusError::ProtocolViolation` if the exchange is already terminal.
    pub fn complete(&mut self) -> Result<(), BusError> {
        self.ensure_active()?;
        self.status = ExchangeStatus::Done;
        Ok(())
    }

    /// Marks the exchange `Error` with the given failure attached.
    ///
    /// # Errors
    ///
    /// Returns `BusError::ProtocolViolation` if the exchange is already terminal.
    pub fn fail(&mut self, failure: ExchangeFailure) -> Result<(), BusError> {
        self.ensure_active()?;
        self.failure = Some(failure);
        self.status = ExchangeStatus::Error;
        Ok(())
    }

    fn ensure_active(&self) -> Result<(), BusError> {
        if self.status.is_terminal() {
            return Err(BusError::protocol_violation(format!(
                "exchange {} already reached terminal status {:?}",
                self.id, self.status
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_status_is_reached_exactly_once() {
        let mut exchange = Exchange::new(ExchangePattern::InOut);
        exchange.complete().unwrap();
        assert_eq!(exchange.status(), ExchangeStatus::Done);

        let err = exchange
            .fail(ExchangeFailure {
                kind: ErrorKind::Infrastructure,
                message: "late".into(),
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
        assert_eq!(exchange.status(), ExchangeStatus::Done);
        assert!(exchange.failure().is_none());
    }

    #[test]
    fn only_one_context_can_be_attached() {
        let mut exchange = Exchange::new(ExchangePattern::InOnly);
        exchange.attach_context(CallContext::new("m", "c")).unwrap();
        let err = exchange
            .attach_context(CallContext::new("m2", "c2"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
        assert_eq!(exchange.context().unwrap().message_id, "m");
    }

    #[test]
    fn clear_reply_drops_out_and_fault_only() {
        let mut exchange = Exchange::new(ExchangePattern::InOut);
        exchange.set_message(IN, NormalizedMessage::new(Content::Stream(Bytes::from_static(b"{}"))));
        exchange.set_message(OUT, NormalizedMessage::new(Content::Stream(Bytes::from_static(b"{}"))));
        exchange.set_fault(Fault::new("Server", Content::Unsupported("dom".into())));

        exchange.clear_reply();

        assert!(exchange.message(IN).is_some());
        assert!(exchange.message(OUT).is_none());
        assert!(exchange.fault().is_none());
    }

    #[test]
    fn content_conversions_between_tree_and_stream() {
        let tree = serde_json::json!({"order": {"id": 7}});
        let stream = Content::Tree(tree.clone()).into_stream().unwrap();
        let Content::Stream(bytes) = &stream else {
            panic!("expected stream content");
        };
        assert_eq!(Content::stream_to_tree(bytes).unwrap(), tree);
        assert_eq!(stream.into_tree().unwrap(), Content::Tree(tree));
    }

    #[test]
    fn unsupported_content_never_converts() {
        let err = Content::Unsupported("sax".into()).into_stream().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IllegalInput);
        let err = Content::Unsupported("sax".into()).into_tree().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IllegalInput);
    }

    #[test]
    fn malformed_stream_is_illegal_input() {
        let err = Content::Stream(Bytes::from_static(b"<not json"))
            .into_tree()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IllegalInput);
    }

    #[test]
    fn peer_role_flips() {
        assert_eq!(ExchangeRole::Consumer.peer(), ExchangeRole::Provider);
        assert_eq!(ExchangeRole::Provider.peer(), ExchangeRole::Consumer);
    }
}
