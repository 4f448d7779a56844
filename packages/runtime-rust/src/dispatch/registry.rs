//! Command registry: builds commands by operation name.

use std::collections::HashMap;
use std::sync::Arc;

use conduit_core::{BusError, BusResult, CallContext, OperationDescription, QName};

use super::command::{BoxCommand, CommandFactory};

type CommandBuilder = Arc<dyn Fn(&OperationDescription, &CallContext) -> BoxCommand + Send + Sync>;

/// [`CommandFactory`] keyed by qualified operation name.
///
/// Operations without a registered builder fail with `BusError::Configuration`.
#[derive(Default)]
pub struct CommandRegistry {
    builders: HashMap<QName, CommandBuilder>,
}

impl CommandRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the builder of the command handling `operation`.
    pub fn register<F>(&mut self, operation: QName, builder: F)
    where
        F: Fn(&OperationDescription, &CallContext) -> BoxCommand + Send + Sync + 'static,
    {
        self.builders.insert(operation, Arc::new(builder));
    }

    #[must_use]
    pub fn with<F>(mut self, operation: QName, builder: F) -> Self
    where
        F: Fn(&OperationDescription, &CallContext) -> BoxCommand + Send + Sync + 'static,
    {
        self.register(operation, builder);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.builders.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.builders.is_empty()
    }
}

impl CommandFactory for CommandRegistry {
    fn build(&self, description: &OperationDescription, ctx: &CallContext) -> BusResult<BoxCommand> {
        self.builders
            .get(&description.name)
            .map(|builder| builder(description, ctx))
            .ok_or_else(|| {
                BusError::configuration(format!(
                    "no command registered for operation {}",
                    description.name
                ))
            })
    }
}
