//! Edit session for a single flag.
//!
//! ```text
//! Idle → Loading → Ready → Submitting → Succeeded | Conflicted | Failed
//! ```
//!
//! The controller owns the server snapshot (the concurrency baseline) and a
//! log of local edits applied on top of it. A failed submission keeps the
//! edit log, so retrying needs no re-entry. A conflict blocks further
//! submissions until the caller reloads; the edit log is then replayed on the
//! fresh snapshot. Nothing here retries or reloads on its own.
//!
//! At most one mutation is in flight per controller. A second `save` or
//! `archive` issued while one is pending is rejected with
//! `FlagError::SubmissionInFlight`, never queued.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use crate::errors::{FlagError, FlagResult};
use crate::expiry;
use crate::models::{validate_for_create, validate_for_update, FeatureFlag, FlagState};
use crate::store::FlagRepository;

/// Where an edit session stands.
///
/// `Failed` is Ready with an error reported. The snapshot and edit log are
/// kept, so further edits and a direct `save`/`archive` retry are accepted.
/// `Conflicted` refuses submissions until `reload` succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Loading,
    Ready,
    Submitting,
    Succeeded,
    Conflicted,
    Failed,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Loading => "loading",
            SessionState::Ready => "ready",
            SessionState::Submitting => "submitting",
            SessionState::Succeeded => "succeeded",
            SessionState::Conflicted => "conflicted",
            SessionState::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single local change to the working copy.
#[derive(Debug, Clone, PartialEq)]
pub enum FlagEdit {
    /// Only valid on drafts; on a persisted flag the save is rejected.
    SetTechnicalName(String),
    SetDisplayName(Option<String>),
    SetDescription(Option<String>),
    SetExpiresOn(Option<DateTime<Utc>>),
    SetInverted(bool),
    ToggleInverted,
    /// `None` makes the flag apply to all customers.
    SetCustomerIds(Option<Vec<String>>),
    AddCustomer(String),
    RemoveCustomer(String),
}

impl FlagEdit {
    pub fn apply(&self, flag: FeatureFlag) -> FeatureFlag {
        match self {
            FlagEdit::SetTechnicalName(name) => FeatureFlag {
                technical_name: name.clone(),
                ..flag
            },
            FlagEdit::SetDisplayName(v) => FeatureFlag {
                display_name: v.clone(),
                ..flag
            },
            FlagEdit::SetDescription(v) => FeatureFlag {
                description: v.clone(),
                ..flag
            },
            FlagEdit::SetExpiresOn(at) => FeatureFlag {
                expires_on: *at,
                ..flag
            },
            FlagEdit::SetInverted(inverted) => FeatureFlag {
                inverted: *inverted,
                ..flag
            },
            FlagEdit::ToggleInverted => flag.toggle_inverted(),
            FlagEdit::SetCustomerIds(ids) => FeatureFlag {
                customer_ids: ids.clone(),
                ..flag
            },
            FlagEdit::AddCustomer(id) => {
                let mut ids = flag.customer_ids.clone().unwrap_or_default();
                if !ids.contains(id) {
                    ids.push(id.clone());
                }
                FeatureFlag {
                    customer_ids: Some(ids),
                    ..flag
                }
            }
            FlagEdit::RemoveCustomer(id) => {
                let ids = flag
                    .customer_ids
                    .clone()
                    .map(|ids| ids.into_iter().filter(|c| c != id).collect::<Vec<_>>())
                    .filter(|ids| !ids.is_empty());
                FeatureFlag {
                    customer_ids: ids,
                    ..flag
                }
            }
        }
    }
}

#[derive(Debug)]
struct Session {
    state: SessionState,
    baseline: Option<FeatureFlag>,
    edits: Vec<FlagEdit>,
}

impl Session {
    fn working(&self) -> Option<FeatureFlag> {
        self.baseline
            .as_ref()
            .map(|base| self.edits.iter().fold(base.clone(), |f, e| e.apply(f)))
    }

    /// Edits may be applied whenever a snapshot is loaded and not archived.
    fn ensure_editable(&self) -> FlagResult<&FeatureFlag> {
        match self.state {
            SessionState::Submitting => return Err(FlagError::SubmissionInFlight),
            SessionState::Idle | SessionState::Loading => {
                return Err(FlagError::NotReady {
                    state: self.state.name(),
                })
            }
            _ => {}
        }
        let base = self.baseline.as_ref().ok_or(FlagError::NotReady {
            state: self.state.name(),
        })?;
        if base.state() == FlagState::Archived {
            return Err(FlagError::Archived);
        }
        Ok(base)
    }

    fn ensure_can_submit(&self) -> FlagResult<FeatureFlag> {
        if self.state == SessionState::Conflicted {
            return Err(FlagError::ReloadRequired);
        }
        self.ensure_editable().cloned()
    }

    fn ensure_can_load(&self) -> FlagResult<()> {
        match self.state {
            SessionState::Submitting => Err(FlagError::SubmissionInFlight),
            SessionState::Loading => Err(FlagError::NotReady {
                state: self.state.name(),
            }),
            _ => Ok(()),
        }
    }
}

/// Resets a session left in `Submitting` when the submitting future is
/// dropped before the store answered.
struct InFlight<'a> {
    session: &'a Mutex<Session>,
    armed: bool,
}

impl<'a> InFlight<'a> {
    fn new(session: &'a Mutex<Session>) -> Self {
        Self {
            session,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut session = self.session.lock().unwrap_or_else(|e| e.into_inner());
        if session.state == SessionState::Submitting {
            tracing::warn!("submission abandoned before the store answered");
            session.state = SessionState::Failed;
        }
    }
}

pub struct LifecycleController {
    repo: Arc<dyn FlagRepository>,
    session: Mutex<Session>,
}

impl LifecycleController {
    pub fn new(repo: Arc<dyn FlagRepository>) -> Self {
        Self {
            repo,
            session: Mutex::new(Session {
                state: SessionState::Idle,
                baseline: None,
                edits: Vec::new(),
            }),
        }
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> SessionState {
        self.session().state
    }

    /// The last state confirmed by the store (or the draft, before creation).
    pub fn snapshot(&self) -> Option<FeatureFlag> {
        self.session().baseline.clone()
    }

    /// Snapshot with local edits applied.
    pub fn working(&self) -> Option<FeatureFlag> {
        self.session().working()
    }

    pub fn pending_edits(&self) -> Vec<FlagEdit> {
        self.session().edits.clone()
    }

    pub fn is_dirty(&self) -> bool {
        !self.session().edits.is_empty()
    }

    /// Start a create session. The draft is held locally until `save`.
    pub fn open_new(&self, draft: FeatureFlag) -> FlagResult<()> {
        let mut s = self.session();
        s.ensure_can_load()?;
        if draft.state() != FlagState::Draft {
            return Err(FlagError::invalid("only a draft can start a create session"));
        }
        s.baseline = Some(draft);
        s.edits.clear();
        s.state = SessionState::Ready;
        Ok(())
    }

    /// Load a flag for viewing or editing. Discards any previous session.
    pub async fn open(&self, id: Uuid) -> FlagResult<FeatureFlag> {
        {
            let mut s = self.session();
            s.ensure_can_load()?;
            s.baseline = None;
            s.edits.clear();
            s.state = SessionState::Loading;
        }
        self.load(id, SessionState::Failed).await
    }

    /// Re-fetch the current server state. The only way out of `Conflicted`.
    /// Pending edits are kept and replayed on the fresh snapshot.
    pub async fn reload(&self) -> FlagResult<FeatureFlag> {
        let (id, previous) = {
            let mut s = self.session();
            s.ensure_can_load()?;
            let base = s.baseline.as_ref().ok_or(FlagError::NotReady {
                state: s.state.name(),
            })?;
            if base.state() == FlagState::Archived {
                return Err(FlagError::Archived);
            }
            let id = base.id.ok_or(FlagError::NotReady {
                state: s.state.name(),
            })?;
            let previous = s.state;
            s.state = SessionState::Loading;
            (id, previous)
        };
        let on_error = if previous == SessionState::Conflicted {
            SessionState::Conflicted
        } else {
            SessionState::Failed
        };
        self.load(id, on_error).await
    }

    async fn load(&self, id: Uuid, on_error: SessionState) -> FlagResult<FeatureFlag> {
        tracing::debug!(%id, "loading flag");
        let result = self.repo.fetch_one(id).await;

        let mut s = self.session();
        match result {
            Ok(flag) => {
                tracing::debug!(%id, updated_at = %flag.updated_at, "flag loaded");
                s.baseline = Some(flag.clone());
                s.state = SessionState::Ready;
                Ok(flag)
            }
            Err(e) => {
                tracing::warn!(%id, error = %e, "failed to load flag");
                s.state = on_error;
                Err(e)
            }
        }
    }

    pub fn apply(&self, edit: FlagEdit) -> FlagResult<()> {
        let mut s = self.session();
        s.ensure_editable()?;
        s.edits.push(edit);
        Ok(())
    }

    /// Set the expiry from local wall-clock text. Blank clears the expiry.
    pub fn set_expiry_local(&self, input: Option<&str>) -> FlagResult<()> {
        let at = expiry::from_editable(input)?;
        self.apply(FlagEdit::SetExpiresOn(at))
    }

    /// The working copy's expiry as local wall-clock text.
    pub fn expiry_local(&self) -> Option<String> {
        self.working().and_then(|f| expiry::to_editable(f.expires_on))
    }

    pub fn discard_edits(&self) -> FlagResult<()> {
        let mut s = self.session();
        if s.state == SessionState::Submitting {
            return Err(FlagError::SubmissionInFlight);
        }
        s.edits.clear();
        Ok(())
    }

    /// Submit the working copy: create for a draft, update otherwise.
    pub async fn save(&self) -> FlagResult<FeatureFlag> {
        let (baseline, working) = {
            let mut s = self.session();
            let baseline = s.ensure_can_submit()?;
            let working = s.working().unwrap_or_else(|| baseline.clone());
            match baseline.state() {
                FlagState::Draft => validate_for_create(&working)?,
                FlagState::Active => validate_for_update(&baseline, &working)?,
                FlagState::Archived => return Err(FlagError::Archived),
            }
            s.state = SessionState::Submitting;
            (baseline, working)
        };

        let guard = InFlight::new(&self.session);
        let result = match baseline.id {
            None => self.repo.create(&working).await,
            Some(id) => self.repo.update(id, baseline.updated_at, &working).await,
        };
        guard.disarm();

        let mut s = self.session();
        match result {
            Ok(flag) => {
                tracing::info!(
                    id = ?flag.id,
                    technical_name = %flag.technical_name,
                    updated_at = %flag.updated_at,
                    "flag saved"
                );
                s.baseline = Some(flag.clone());
                s.edits.clear();
                s.state = SessionState::Succeeded;
                Ok(flag)
            }
            Err(e) => {
                s.state = if e.is_conflict() {
                    tracing::warn!(
                        technical_name = %baseline.technical_name,
                        token = %baseline.updated_at,
                        "save conflicted, reload required"
                    );
                    SessionState::Conflicted
                } else {
                    tracing::warn!(technical_name = %baseline.technical_name, error = %e, "save failed");
                    SessionState::Failed
                };
                Err(e)
            }
        }
    }

    /// Retire the loaded flag. Terminal for this session.
    pub async fn archive(&self) -> FlagResult<()> {
        let id = {
            let mut s = self.session();
            let baseline = s.ensure_can_submit()?;
            let id = match baseline.state() {
                FlagState::Draft => {
                    return Err(FlagError::invalid("a draft has nothing to archive"))
                }
                FlagState::Archived => return Err(FlagError::Archived),
                FlagState::Active => baseline.id.ok_or(FlagError::NotReady {
                    state: s.state.name(),
                })?,
            };
            s.state = SessionState::Submitting;
            id
        };

        let guard = InFlight::new(&self.session);
        let result = self.repo.archive(id).await;
        guard.disarm();

        let mut s = self.session();
        match result {
            Ok(()) => {
                tracing::info!(%id, "flag archived");
                if let Some(base) = s.baseline.as_mut() {
                    base.archived = true;
                }
                s.edits.clear();
                s.state = SessionState::Succeeded;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(%id, error = %e, "archive failed");
                s.state = if e.is_conflict() {
                    SessionState::Conflicted
                } else {
                    SessionState::Failed
                };
                Err(e)
            }
        }
    }
}
