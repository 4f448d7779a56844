//! Classification of inbound exchanges into dispatch states.
//!
//! An exchange arrives at this side either as the target of a request, as the
//! callback of a partner operation, or as the answer to an exchange this side
//! initiated. The classification fixes the role and scope stamped into the
//! call context before the command runs.

use conduit_core::{ExchangeRole, Role, Scope};

/// Where an inbound exchange sits in the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchState {
    /// Not yet classified.
    New,
    /// Answer to an exchange this side initiated.
    InitiatorResponse,
    /// Request addressed to an operation this side provides.
    ProviderRequest,
    /// Callback invocation of a partner operation this side provides.
    PartnerResponse,
}

impl DispatchState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::InitiatorResponse => "initiator-response",
            Self::ProviderRequest => "provider-request",
            Self::PartnerResponse => "partner-response",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub role: Role,
    pub scope: Scope,
    pub state: DispatchState,
}

/// Classifies an exchange from this side's role and whether the resolved
/// operation is a partner operation.
///
/// | this side | partner op | role     | scope    | state             |
/// |-----------|------------|----------|----------|-------------------|
/// | provider  | no         | receiver | request  | provider request  |
/// | provider  | yes        | sender   | response | partner response  |
/// | consumer  | any        | sender   | response | initiator response|
#[must_use]
pub fn classify(side: ExchangeRole, partner_operation: bool) -> Classification {
    match (side, partner_operation) {
        (ExchangeRole::Provider, false) => Classification {
            role: Role::Receiver,
            scope: Scope::Request,
            state: DispatchState::ProviderRequest,
        },
        (ExchangeRole::Provider, true) => Classification {
            role: Role::Sender,
            scope: Scope::Response,
            state: DispatchState::PartnerResponse,
        },
        (ExchangeRole::Consumer, _) => Classification {
            role: Role::Sender,
            scope: Scope::Response,
            state: DispatchState::InitiatorResponse,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_request() {
        let c = classify(ExchangeRole::Provider, false);
        assert_eq!(c.role, Role::Receiver);
        assert_eq!(c.scope, Scope::Request);
        assert_eq!(c.state, DispatchState::ProviderRequest);
    }

    #[test]
    fn partner_response() {
        let c = classify(ExchangeRole::Provider, true);
        assert_eq!(c.role, Role::Sender);
        assert_eq!(c.scope, Scope::Response);
        assert_eq!(c.state, DispatchState::PartnerResponse);
    }

    #[test]
    fn initiator_response_ignores_partner_flag() {
        for partner in [false, true] {
            let c = classify(ExchangeRole::Consumer, partner);
            assert_eq!(c.role, Role::Sender);
            assert_eq!(c.scope, Scope::Response);
            assert_eq!(c.state, DispatchState::InitiatorResponse);
        }
    }

    #[test]
    fn classification_never_yields_new() {
        for side in [ExchangeRole::Consumer, ExchangeRole::Provider] {
            for partner in [false, true] {
                assert_ne!(classify(side, partner).state, DispatchState::New);
            }
        }
    }
}
