//! In-memory service catalog.
//!
//! [`StaticCatalog`] answers operation resolution, agreed-policy lookup and
//! participant lookup from tables filled at startup.

use std::collections::HashMap;

use conduit_core::{
    AgreedPolicy, BusError, BusResult, EndpointRef, OperationDescription, Participant, QName,
};

use crate::traits::{ParticipantDirectory, PolicyRegistry, ServiceDescriptionResolver};

#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    operations: HashMap<(QName, QName), OperationDescription>,
    endpoint_operations: HashMap<(EndpointRef, QName), OperationDescription>,
    policies: HashMap<QName, AgreedPolicy>,
    participants: HashMap<EndpointRef, Participant>,
}

impl StaticCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Describes an operation of `service`.
    #[must_use]
    pub fn with_operation(mut self, service: QName, description: OperationDescription) -> Self {
        self.operations
            .insert((service, description.name.clone()), description);
        self
    }

    /// Describes an operation as seen through one specific endpoint. Takes
    /// precedence over the service-wide description.
    #[must_use]
    pub fn with_endpoint_operation(
        mut self,
        endpoint: EndpointRef,
        description: OperationDescription,
    ) -> Self {
        self.endpoint_operations
            .insert((endpoint, description.name.clone()), description);
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: AgreedPolicy) -> Self {
        self.policies.insert(policy.service.clone(), policy);
        self
    }

    #[must_use]
    pub fn with_participant(mut self, endpoint: EndpointRef, participant: Participant) -> Self {
        self.participants.insert(endpoint, participant);
        self
    }
}

impl ServiceDescriptionResolver for StaticCatalog {
    fn operation(&self, service: &QName, operation: &QName) -> BusResult<OperationDescription> {
        self.operations
            .get(&(service.clone(), operation.clone()))
            .cloned()
            .ok_or_else(|| {
                BusError::configuration(format!(
                    "operation {operation} is not described for service {service}"
                ))
            })
    }

    fn endpoint_operation(
        &self,
        endpoint: &EndpointRef,
        operation: &QName,
    ) -> Option<OperationDescription> {
        self.endpoint_operations
            .get(&(endpoint.clone(), operation.clone()))
            .cloned()
    }
}

impl PolicyRegistry for StaticCatalog {
    fn agreed_policy(&self, service: &QName) -> Option<AgreedPolicy> {
        self.policies.get(service).cloned()
    }
}

impl ParticipantDirectory for StaticCatalog {
    fn participant_for(&self, endpoint: &EndpointRef) -> Option<Participant> {
        self.participants.get(endpoint).cloned()
    }
}

#[cfg(test)]
mod tests {
    use conduit_core::{ErrorKind, ExchangePattern, Transport};

    use super::*;

    fn billing() -> QName {
        QName::new("urn:acme", "Billing")
    }

    #[test]
    fn resolves_service_operation() {
        let pay = OperationDescription::new(QName::new("urn:acme", "pay"), ExchangePattern::InOut);
        let catalog = StaticCatalog::new().with_operation(billing(), pay.clone());

        assert_eq!(
            catalog.operation(&billing(), &QName::new("urn:acme", "pay")).unwrap(),
            pay
        );
        let err = catalog
            .operation(&billing(), &QName::new("urn:acme", "refund"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn endpoint_description_is_separate() {
        let endpoint = EndpointRef::new(billing(), "billing-http");
        let pay = OperationDescription::new(QName::new("urn:acme", "pay"), ExchangePattern::InOnly);
        let catalog = StaticCatalog::new().with_endpoint_operation(endpoint.clone(), pay.clone());

        assert_eq!(
            catalog.endpoint_operation(&endpoint, &QName::new("urn:acme", "pay")),
            Some(pay)
        );
        assert!(catalog
            .operation(&billing(), &QName::new("urn:acme", "pay"))
            .is_err());
    }

    #[test]
    fn looks_up_policies_and_participants() {
        let endpoint = EndpointRef::new(billing(), "billing-jms");
        let catalog = StaticCatalog::new()
            .with_policy(AgreedPolicy::new("p-1", billing()))
            .with_participant(endpoint.clone(), Participant::new("acme-billing", Transport::Jms));

        assert_eq!(catalog.agreed_policy(&billing()).map(|p| p.id), Some("p-1".into()));
        assert!(catalog.agreed_policy(&QName::local("Other")).is_none());
        assert_eq!(
            catalog.participant_for(&endpoint).map(|p| p.unified_id),
            Some("acme-billing".into())
        );
    }
}
