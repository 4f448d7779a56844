//! Call-context persistence.
//!
//! A [`CallContextStore`] parks a [`CallContext`] under its key so that the
//! call can resume after an asynchronous suspension or a process boundary.
//! Reads are destructive: a context is restored at most once.
//!
//! Backends:
//! - [`MemoryContextStore`]: process-local map
//! - [`FileContextStore`]: one file per key
//! - [`SqlContextStore`]: one row per key (feature `relational`)
//! - [`DirectoryContextStore`]: one directory entry per key, with reconnect
//!
//! Stores are constructed once (see [`open_store`]) and passed to their users.

pub mod directory;
pub mod factory;
pub mod filesystem;
pub mod memory;
#[cfg(feature = "relational")]
pub mod relational;

use async_trait::async_trait;
use conduit_core::{BusError, BusResult, CallContext};

pub use directory::{
    DirectoryConnection, DirectoryConnector, DirectoryContextStore, DirectoryError,
    MemoryDirectory,
};
pub use factory::open_store;
pub use filesystem::FileContextStore;
pub use memory::MemoryContextStore;
#[cfg(feature = "relational")]
pub use relational::SqlContextStore;

/// Persistence of call contexts keyed by [`CallContext::key`].
#[async_trait]
pub trait CallContextStore: Send + Sync {
    /// Persist the context and return the key it was stored under.
    async fn store(&self, ctx: &CallContext) -> BusResult<String>;

    /// Read and delete the context stored under `key`.
    ///
    /// A missing key fails with an error for which
    /// [`BusError::is_not_found`] holds.
    async fn restore(&self, key: &str) -> BusResult<CallContext>;

    /// Delete the context stored under `key`, if any.
    async fn remove(&self, key: &str) -> BusResult<()>;
}

/// Rejects keys no backend can address.
pub(crate) fn check_key(key: &str) -> BusResult<()> {
    if key.is_empty() {
        return Err(BusError::illegal_input("call context key is empty"));
    }
    if key.contains(['/', '\\', '\0']) || key == "." || key == ".." {
        return Err(BusError::illegal_input(format!(
            "call context key `{key}` contains reserved characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use conduit_core::{
        AgreedPolicy, Assertion, CallContext, CommunicationStyle, Participant, QName, Role, Scope,
        Transport,
    };

    /// A context with every field populated.
    pub fn full_context(message_id: &str) -> CallContext {
        let mut ctx = CallContext::new(message_id, "corr:42");
        ctx.provider_id = Some("node-a".into());
        ctx.exchange_id = Some("ex-9".into());
        ctx.service = Some(QName::new("urn:acme", "Billing"));
        ctx.operation = Some("pay".into());
        ctx.partner_operation = Some("payCallback".into());
        ctx.style = CommunicationStyle::RequestResponse;
        ctx.scope = Some(Scope::Response);
        ctx.role = Some(Role::Receiver);
        ctx.participant = Some(Participant::new("consumer-7", Transport::Jms));
        ctx.policy = Some(
            AgreedPolicy::new("p-1", QName::new("urn:acme", "Billing")).with_assertion(
                Assertion::Tracking {
                    level: "full".into(),
                },
            ),
        );
        ctx.action = Some("urn:acme:pay".into());
        ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::ErrorKind;
    use proptest::prelude::*;

    #[test]
    fn derived_keys_are_accepted() {
        let ctx = testing::full_context("msg:1");
        assert!(check_key(&ctx.key()).is_ok());
    }

    #[test]
    fn reserved_keys_are_illegal_input() {
        for key in ["", "..", "a/b", "a\\b"] {
            let err = check_key(key).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::IllegalInput, "key: {key:?}");
        }
    }

    proptest! {
        #[test]
        fn keys_with_separators_are_rejected(head in "[a-z0-9]{0,8}", tail in "[a-z0-9]{0,8}") {
            let slashed = format!("{head}/{tail}");
            let backslashed = format!("{head}\\{tail}");
            prop_assert!(check_key(&slashed).is_err());
            prop_assert!(check_key(&backslashed).is_err());
        }

        #[test]
        fn derived_keys_never_contain_separators(message_id in "[a-z0-9:._-]{1,16}") {
            let ctx = testing::full_context(&message_id);
            prop_assert!(check_key(&ctx.key()).is_ok());
        }
    }
}
