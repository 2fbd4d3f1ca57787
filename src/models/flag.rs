use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::errors::{FlagError, FlagResult};

/// A named on/off switch, optionally scoped to customers and given an expiry.
///
/// `id`, `created_at` and `updated_at` are assigned by the flag store. A flag
/// that only exists client-side has no `id` and epoch timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlag {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    pub technical_name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// `None` means the flag never expires.
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub expires_on: Option<DateTime<Utc>>,
    #[serde(default)]
    pub inverted: bool,
    /// `None` means the flag applies to every customer.
    #[serde(default)]
    pub customer_ids: Option<Vec<String>>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    /// Optimistic concurrency token.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub archived: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagState {
    Draft,
    Active,
    Archived,
}

impl FeatureFlag {
    /// A client-side flag that has not been created in the store yet.
    pub fn draft(technical_name: impl Into<String>) -> Self {
        Self {
            id: None,
            technical_name: technical_name.into(),
            display_name: None,
            description: None,
            expires_on: None,
            inverted: false,
            customer_ids: None,
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
            archived: false,
        }
    }

    pub fn state(&self) -> FlagState {
        match (self.id, self.archived) {
            (None, _) => FlagState::Draft,
            (Some(_), false) => FlagState::Active,
            (Some(_), true) => FlagState::Archived,
        }
    }

    /// Returns a copy with `inverted` flipped. No other field changes.
    pub fn toggle_inverted(&self) -> FeatureFlag {
        FeatureFlag {
            inverted: !self.inverted,
            ..self.clone()
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_on.is_some_and(|at| at <= now)
    }

    pub fn is_scoped(&self) -> bool {
        self.customer_ids.as_ref().is_some_and(|ids| !ids.is_empty())
    }

    pub fn applies_to(&self, customer_id: &str) -> bool {
        match &self.customer_ids {
            Some(ids) if !ids.is_empty() => ids.iter().any(|id| id == customer_id),
            _ => true,
        }
    }

    /// An empty customer list reads the same as no list: unscoped.
    pub fn normalized_customer_ids(&self) -> Option<Vec<String>> {
        self.customer_ids.clone().filter(|ids| !ids.is_empty())
    }
}

pub fn validate_for_create(draft: &FeatureFlag) -> FlagResult<()> {
    let mut errs = field_errors(draft);
    if draft.id.is_some() {
        errs.push("flag already has an id, it cannot be created again".to_string());
    }
    if errs.is_empty() {
        Ok(())
    } else {
        Err(FlagError::InvalidFlag(errs))
    }
}

/// Changes to `technicalName` (or `id`) are rejected, never silently dropped.
pub fn validate_for_update(existing: &FeatureFlag, edited: &FeatureFlag) -> FlagResult<()> {
    if edited.id != existing.id {
        return Err(FlagError::ImmutableFieldChanged { field: "id" });
    }
    if edited.technical_name != existing.technical_name {
        return Err(FlagError::ImmutableFieldChanged {
            field: "technicalName",
        });
    }

    validate_fields(edited)
}

/// Field rules shared by create and update, without the identity checks.
pub(crate) fn validate_fields(flag: &FeatureFlag) -> FlagResult<()> {
    let errs = field_errors(flag);
    if errs.is_empty() {
        Ok(())
    } else {
        Err(FlagError::InvalidFlag(errs))
    }
}

fn field_errors(flag: &FeatureFlag) -> Vec<String> {
    let mut errs = Vec::new();

    if flag.technical_name.trim().is_empty() {
        errs.push("'technicalName' must not be blank".to_string());
    }

    if let Some(ids) = &flag.customer_ids {
        let mut seen = HashSet::new();
        let mut dupes: Vec<&str> = Vec::new();
        for id in ids {
            if !seen.insert(id.as_str()) && !dupes.contains(&id.as_str()) {
                dupes.push(id);
            }
        }
        if !dupes.is_empty() {
            errs.push(format!(
                "'customerIds' contains duplicates: {}",
                dupes.join(", ")
            ));
        }
    }

    errs
}

// ── Wire payloads ─────────────────────────────────────────────

/// Editable fields as sent on create, and nested under `feature` on update.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagPayload {
    pub technical_name: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub inverted: bool,
    pub customer_ids: Option<Vec<String>>,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub expires_on: Option<DateTime<Utc>>,
}

impl From<&FeatureFlag> for FlagPayload {
    fn from(f: &FeatureFlag) -> Self {
        Self {
            technical_name: f.technical_name.clone(),
            display_name: f.display_name.clone(),
            description: f.description.clone(),
            inverted: f.inverted,
            customer_ids: f.normalized_customer_ids(),
            expires_on: f.expires_on,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFlagRequest {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_updated_at: DateTime<Utc>,
    pub feature: FlagPayload,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveFlagRequest {
    pub feature_id: Uuid,
}
