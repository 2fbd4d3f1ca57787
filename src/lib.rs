//! flagctl — feature flag lifecycle engine.
//!
//! Model, store client, edit-session controller and expiry codec. The
//! `flagctl` binary is one consumer of these modules.

pub mod config;
pub mod errors;
pub mod expiry;
pub mod lifecycle;
pub mod models;
pub mod store;

pub use errors::{FlagError, FlagResult};
pub use lifecycle::{FlagEdit, LifecycleController, SessionState};
pub use models::{FeatureFlag, FlagState};
pub use store::{CustomerFeature, FlagRepository, HttpFlagRepository};
