//! In-process flag store with the same optimistic-concurrency rules as the
//! remote one. Shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;
use uuid::Uuid;

use flagctl::{CustomerFeature, FeatureFlag, FlagError, FlagRepository, FlagResult};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

#[derive(Default)]
struct Inner {
    flags: Vec<FeatureFlag>,
    archived: HashMap<Uuid, FeatureFlag>,
    ticks: i64,
    fail_next: Option<FlagError>,
}

impl Inner {
    fn now(&mut self) -> DateTime<Utc> {
        let now = t0() + Duration::seconds(self.ticks);
        self.ticks += 1;
        now
    }

    fn take_failure(&mut self) -> FlagResult<()> {
        match self.fail_next.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    /// When set, mutations wait for a notification before answering.
    hold: Mutex<Option<std::sync::Arc<Notify>>>,
    mutations: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of mutating requests that reached the store.
    pub fn mutations(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    pub fn fail_next(&self, err: FlagError) {
        self.inner.lock().unwrap().fail_next = Some(err);
    }

    pub fn hold_mutations(&self) -> std::sync::Arc<Notify> {
        let notify = std::sync::Arc::new(Notify::new());
        *self.hold.lock().unwrap() = Some(notify.clone());
        notify
    }

    /// Another writer changes the flag behind everyone's back.
    pub fn touch(&self, id: Uuid) -> DateTime<Utc> {
        let mut inner = self.inner.lock().unwrap();
        let now = inner.now();
        let flag = inner
            .flags
            .iter_mut()
            .find(|f| f.id == Some(id))
            .expect("flag exists");
        flag.updated_at = now;
        now
    }

    async fn gate(&self) {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        let hold = self.hold.lock().unwrap().clone();
        if let Some(notify) = hold {
            notify.notified().await;
        }
    }
}

#[async_trait]
impl FlagRepository for MemoryStore {
    async fn list(&self) -> FlagResult<Vec<FeatureFlag>> {
        let mut inner = self.inner.lock().unwrap();
        inner.take_failure()?;
        Ok(inner.flags.clone())
    }

    async fn fetch_one(&self, id: Uuid) -> FlagResult<FeatureFlag> {
        let mut inner = self.inner.lock().unwrap();
        inner.take_failure()?;
        inner
            .flags
            .iter()
            .find(|f| f.id == Some(id))
            .cloned()
            .ok_or_else(|| FlagError::NotFound(id.to_string()))
    }

    async fn create(&self, draft: &FeatureFlag) -> FlagResult<FeatureFlag> {
        self.gate().await;
        let mut inner = self.inner.lock().unwrap();
        inner.take_failure()?;
        if inner
            .flags
            .iter()
            .any(|f| f.technical_name == draft.technical_name)
        {
            return Err(FlagError::ValidationRejected(
                "'technicalName' already exists".into(),
            ));
        }
        let now = inner.now();
        let flag = FeatureFlag {
            id: Some(Uuid::new_v4()),
            customer_ids: draft.normalized_customer_ids(),
            created_at: now,
            updated_at: now,
            ..draft.clone()
        };
        inner.flags.push(flag.clone());
        Ok(flag)
    }

    async fn update(
        &self,
        id: Uuid,
        expected_updated_at: DateTime<Utc>,
        edits: &FeatureFlag,
    ) -> FlagResult<FeatureFlag> {
        self.gate().await;
        let mut inner = self.inner.lock().unwrap();
        inner.take_failure()?;
        let now = inner.now();
        let flag = inner
            .flags
            .iter_mut()
            .find(|f| f.id == Some(id))
            .ok_or_else(|| FlagError::NotFound(id.to_string()))?;
        if flag.updated_at != expected_updated_at {
            return Err(FlagError::Conflict(id.to_string()));
        }
        flag.display_name = edits.display_name.clone();
        flag.description = edits.description.clone();
        flag.expires_on = edits.expires_on;
        flag.inverted = edits.inverted;
        flag.customer_ids = edits.normalized_customer_ids();
        flag.updated_at = now;
        Ok(flag.clone())
    }

    async fn archive(&self, id: Uuid) -> FlagResult<()> {
        self.gate().await;
        let mut inner = self.inner.lock().unwrap();
        inner.take_failure()?;
        let pos = inner
            .flags
            .iter()
            .position(|f| f.id == Some(id))
            .ok_or_else(|| FlagError::NotFound(id.to_string()))?;
        let mut flag = inner.flags.remove(pos);
        flag.archived = true;
        flag.updated_at = inner.now();
        inner.archived.insert(id, flag);
        Ok(())
    }

    async fn add_customers(&self, id: Uuid, customer_ids: &[String]) -> FlagResult<()> {
        self.gate().await;
        let mut inner = self.inner.lock().unwrap();
        let now = inner.now();
        let flag = inner
            .flags
            .iter_mut()
            .find(|f| f.id == Some(id))
            .ok_or_else(|| FlagError::NotFound(id.to_string()))?;
        let ids = flag.customer_ids.get_or_insert_with(Vec::new);
        for c in customer_ids {
            if !ids.contains(c) {
                ids.push(c.clone());
            }
        }
        flag.updated_at = now;
        Ok(())
    }

    async fn request_as_customer(
        &self,
        customer_id: &str,
        technical_names: &[String],
    ) -> FlagResult<Vec<CustomerFeature>> {
        let inner = self.inner.lock().unwrap();
        let now = Utc::now();
        Ok(technical_names
            .iter()
            .filter_map(|name| inner.flags.iter().find(|f| &f.technical_name == name))
            .map(|f| {
                let has = f.applies_to(customer_id);
                CustomerFeature {
                    name: f.technical_name.clone(),
                    active: has && !f.inverted,
                    inverted: f.inverted,
                    expired: f.is_expired_at(now),
                }
            })
            .collect())
    }
}
