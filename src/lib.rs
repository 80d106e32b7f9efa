//! Invalidation session lifecycle management.
//!
//! The session actor owns a push channel, keeps its credentials fresh, and
//! fans incoming invalidations out to registered handlers. Embedders supply
//! the transport ([`channel::ChannelFactory`]), the account backend
//! ([`credentials::CredentialSource`]), and persistence
//! ([`state_tracker::InvalidationStateTracker`]); everything else is driven
//! through a [`session::SessionHandle`].

pub mod backoff;
pub mod channel;
pub mod config;
pub mod credentials;
pub mod error;
pub mod invalidation;
pub mod registrar;
pub mod session;
pub mod state;
pub mod state_tracker;

pub use channel::{ChannelFactory, ChannelKind, Invalidator, InvalidatorEvents};
pub use config::VigilConfig;
pub use credentials::{AccessToken, CredentialSource, CredentialVariant};
pub use error::{CredentialError, IsRetryable, VigilError};
pub use invalidation::{Invalidation, InvalidationMap, ObjectId, ObjectIdSet};
pub use registrar::InvalidationHandler;
pub use session::{SessionDeps, SessionHandle};
pub use state::{InvalidatorState, InvalidatorStatus};
pub use state_tracker::{InMemoryStateTracker, InvalidationStateTracker};
