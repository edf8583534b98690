//! Core identity broker traits and types.
//!
//! A *broker* is one configured identity provider instance (a local password
//! database, a federated OpenID Connect provider, ...). Each broker is served by
//! an [`Identifier`], built once at startup through the [`BrokerRegistry`] and
//! shared read-only by every request. Resolved principals are cached per broker
//! in the session-scoped [`IdentityStore`].

mod error;
mod identifier;
mod identity;
mod registry;
mod store;

pub use error::{IdentityError, IdentityResult};
pub use identifier::{AuthOutcome, AuthRequest, Identifier};
pub use identity::{BrokerConfig, Identity};
pub use registry::{BoxError, BrokerFactory, BrokerRegistry, Brokers, RegistryError};
pub use store::{IdentityStore, LogoutChainState, LogoutFailure};
