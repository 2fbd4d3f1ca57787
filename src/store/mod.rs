pub mod http;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::FlagResult;
use crate::models::FeatureFlag;

pub use http::HttpFlagRepository;

/// Abstraction over the remote flag store.
/// Implementations: HttpFlagRepository (JSON over HTTP).
///
/// No method retries. Every error the store reports is returned as-is.
#[async_trait]
pub trait FlagRepository: Send + Sync {
    /// All non-archived flags, in store order.
    async fn list(&self) -> FlagResult<Vec<FeatureFlag>>;

    async fn fetch_one(&self, id: Uuid) -> FlagResult<FeatureFlag>;

    /// Persist a draft. Returns the flag with its store-assigned id and timestamps.
    async fn create(&self, draft: &FeatureFlag) -> FlagResult<FeatureFlag>;

    /// Write `edits` only if the store's `updatedAt` for `id` still equals
    /// `expected_updated_at`. A mismatch is a `FlagError::Conflict`.
    async fn update(
        &self,
        id: Uuid,
        expected_updated_at: DateTime<Utc>,
        edits: &FeatureFlag,
    ) -> FlagResult<FeatureFlag>;

    /// Terminal. Archiving twice is an error reported by the store.
    async fn archive(&self, id: Uuid) -> FlagResult<()>;

    /// Scope an existing flag to additional customers.
    async fn add_customers(&self, id: Uuid, customer_ids: &[String]) -> FlagResult<()>;

    /// Ask the store how the named flags evaluate for one customer.
    async fn request_as_customer(
        &self,
        customer_id: &str,
        technical_names: &[String],
    ) -> FlagResult<Vec<CustomerFeature>>;
}

/// Evaluation of a single flag for a single customer, as computed by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerFeature {
    pub name: String,
    pub active: bool,
    pub inverted: bool,
    pub expired: bool,
}
