//! Lifecycle states of a broadcast.
//!
//! Every state is constructed by name through a [`StateRegistry`], so the
//! driver never depends on concrete state types. A state is built on each
//! transition and dropped once it has been exited.

/// Implements [`Named`] from the state's id.
macro_rules! named_state {
    ($state:ty, $id:expr) => {
        impl relaycast_registry::Named for $state {
            fn name(&self) -> &str {
                $id.name()
            }
        }
    };
}

mod idle;
mod live;
mod shutdown;
mod starting;

use std::sync::{Arc, OnceLock};

use relaycast_ipc::StateId;
use relaycast_registry::{Named, Registration, RegistryResult, TypeRegistry};
use tracing::error;

use crate::bus::Event;
use crate::context::BroadcastContext;

pub use idle::{Failed, Provisioning, Stopped};
pub use live::{LivePrimary, LiveSecondary};
pub use shutdown::{Slating, Stopping};
pub use starting::Starting;

/// Behaviour of one lifecycle phase.
pub trait BroadcastState: Named + Send + Sync {
    /// Which state this is.
    fn id(&self) -> StateId;

    /// Runs when the state becomes current. Outcomes are published on the bus.
    fn enter(&self) {}

    /// Runs before the next state is entered.
    fn exit(&self) {}

    /// Handles an event the driver routes to the current state.
    fn handle(&self, _event: &Event) {}
}

/// Registry of state constructors, keyed by [`StateId::name`].
pub type StateRegistry = TypeRegistry<Arc<dyn BroadcastState>, BroadcastContext>;

static GLOBAL_REGISTRY: OnceLock<Arc<StateRegistry>> = OnceLock::new();

/// Registration that builds a state from the broadcast context.
pub fn state_factory<S, F>(id: StateId, build: F) -> Registration<Arc<dyn BroadcastState>, BroadcastContext>
where
    S: BroadcastState + 'static,
    F: Fn(BroadcastContext) -> S + Send + Sync + 'static,
{
    Registration::factory(id.name(), move |ctx| {
        Ok(Arc::new(build(ctx)) as Arc<dyn BroadcastState>)
    })
}

/// Registers every built-in state.
pub fn register_builtin(registry: &StateRegistry) -> RegistryResult<()> {
    registry.register(state_factory(StateId::Provisioning, Provisioning::new))?;
    registry.register(state_factory(StateId::Starting, Starting::new))?;
    registry.register(state_factory(StateId::LivePrimary, LivePrimary::new))?;
    registry.register(state_factory(StateId::LiveSecondary, LiveSecondary::new))?;
    registry.register(state_factory(StateId::Slating, Slating::new))?;
    registry.register(state_factory(StateId::Stopping, Stopping::new))?;
    registry.register(state_factory(StateId::Stopped, Stopped::new))?;
    registry.register(state_factory(StateId::Failed, Failed::new))?;
    Ok(())
}

/// A fresh registry holding the built-in states.
pub fn builtin_registry() -> RegistryResult<StateRegistry> {
    let registry = StateRegistry::new();
    register_builtin(&registry)?;
    Ok(registry)
}

/// Process-wide registry, built with the built-in states on first use.
pub fn global_registry() -> Arc<StateRegistry> {
    let registry = GLOBAL_REGISTRY.get_or_init(|| {
        let registry = StateRegistry::new();
        if let Err(e) = register_builtin(&registry) {
            error!(error = %e, "Could not register built-in states");
        }
        Arc::new(registry)
    });
    Arc::clone(registry)
}
