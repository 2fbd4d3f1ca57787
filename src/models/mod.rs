pub mod flag;

pub use flag::{validate_for_create, validate_for_update, FeatureFlag, FlagState};
