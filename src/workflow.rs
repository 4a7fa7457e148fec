//! Navigation and editing across a session collection.
//!
//! The workflow owns the collection for the whole run. Every caller command is
//! a method that returns a read-only [`SessionView`] or a [`WorkflowError`];
//! none of them leave partial changes behind on failure.

use std::num::IntErrorKind;
use std::path::{Path, PathBuf};

use itertools::Itertools;
use log::{info, warn};
use thiserror::Error;

use crate::completeness::{evaluate, Completeness, CompletenessReport, DerivedField};
use crate::editor::{EditOutcome, EditorError, ManualEditor};
use crate::filter::{FilterConfig, FilterConfigError, FilterPatch};
use crate::orchestrator::{Orchestrator, ProcessError, ProcessOutcome, ProcessRequest, Resolution};
use crate::reconstruct::{ReconstructionError, Reconstructor};
use crate::resample::RateConversionError;
use crate::session::SessionRecord;
use crate::store::{CollectionStore, PersistenceError};

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("invalid rate conversion input: {0}")]
    InvalidRateConversionInput(#[from] RateConversionError),
    #[error("automatic reconstruction failed: {0}")]
    ReconstructionFailed(#[source] ReconstructionError),
    #[error("{input:?} is not a session number; staying on session {index}")]
    InvalidNavigationInput { input: String, index: usize },
    #[error("session {index} is partially processed (unpopulated: {}); choose skip or run", .missing.iter().join(", "))]
    ResolutionRequired {
        index: usize,
        missing: Vec<DerivedField>,
    },
    #[error("session {0} has nothing to resolve")]
    NothingToResolve(usize),
    #[error("there are unsaved changes; save, discard or cancel")]
    UnsavedChangesOnClose,
    #[error("persistence failure: {0}")]
    PersistenceFailure(#[source] PersistenceError),
    #[error("session {index} is invalid: {reason}")]
    InvalidSessionRecord { index: usize, reason: String },
    #[error("session collection is empty")]
    EmptyCollection,
    #[error("invalid filter parameter: {0}")]
    InvalidFilterConfig(#[from] FilterConfigError),
    #[error("manual editor failed: {0}")]
    EditorFailure(#[from] EditorError),
    #[error("session {0} has no reconstructed trace to edit")]
    NothingToEdit(usize),
    #[error("session {0} has no previous filter configuration")]
    NothingToUndo(usize),
    #[error("a collection is already loaded")]
    AlreadyLoaded,
    #[error("no session collection loaded")]
    NoActiveSession,
    #[error("workflow is closed")]
    Closed,
}

impl From<ProcessError> for WorkflowError {
    fn from(e: ProcessError) -> Self {
        match e {
            ProcessError::RateConversion(e)
            | ProcessError::Reconstruction(ReconstructionError::RateConversion(e)) => {
                WorkflowError::InvalidRateConversionInput(e)
            }
            ProcessError::Reconstruction(e) => WorkflowError::ReconstructionFailed(e),
        }
    }
}

impl From<PersistenceError> for WorkflowError {
    fn from(e: PersistenceError) -> Self {
        match e {
            PersistenceError::InvalidRecord { index, reason } => {
                WorkflowError::InvalidSessionRecord { index, reason }
            }
            other => WorkflowError::PersistenceFailure(other),
        }
    }
}

/// Session indices are 1-based throughout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowState {
    AwaitingData,
    Ready(usize),
    Editing(usize),
    Saving,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    Back,
    Next,
    /// Raw user input; parsed and clamped to the collection.
    Jump(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseChoice {
    Save,
    Discard,
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved(PathBuf),
    /// No destination was chosen.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    Closed,
    Cancelled,
}

#[derive(Debug)]
pub struct SessionView<'a> {
    pub index: usize,
    pub total: usize,
    pub record: &'a SessionRecord,
    pub completeness: Completeness,
    /// Filter edits not yet committed to the session.
    pub staged: Option<FilterConfig>,
    pub pending_resolution: bool,
    pub dirty: bool,
}

#[derive(Debug)]
pub struct SessionWorkflow<R, E, S> {
    orchestrator: Orchestrator<R>,
    editor: E,
    store: S,
    sessions: Vec<SessionRecord>,
    state: WorkflowState,
    dirty: bool,
    destination: Option<PathBuf>,
    staged: Option<FilterConfig>,
    pending: Option<CompletenessReport>,
}

impl<R: Reconstructor, E: ManualEditor, S: CollectionStore> SessionWorkflow<R, E, S> {
    pub fn new(orchestrator: Orchestrator<R>, editor: E, store: S) -> Self {
        Self {
            orchestrator,
            editor,
            store,
            sessions: Vec::new(),
            state: WorkflowState::AwaitingData,
            dirty: false,
            destination: None,
            staged: None,
            pending: None,
        }
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn sessions(&self) -> &[SessionRecord] {
        &self.sessions
    }

    pub fn orchestrator(&self) -> &Orchestrator<R> {
        &self.orchestrator
    }

    pub fn editor(&self) -> &E {
        &self.editor
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn destination(&self) -> Option<&Path> {
        self.destination.as_deref()
    }

    /// Hands a collection to the workflow and activates session 1.
    pub fn load(&mut self, mut collection: Vec<SessionRecord>) -> Result<SessionView<'_>, WorkflowError> {
        match self.state {
            WorkflowState::AwaitingData => {}
            WorkflowState::Closed => return Err(WorkflowError::Closed),
            _ => return Err(WorkflowError::AlreadyLoaded),
        }
        if collection.is_empty() {
            return Err(WorkflowError::EmptyCollection);
        }
        for (i, session) in collection.iter().enumerate() {
            session
                .validate()
                .map_err(|reason| WorkflowError::InvalidSessionRecord {
                    index: i + 1,
                    reason,
                })?;
        }

        for (i, session) in collection.iter_mut().enumerate() {
            let index = i + 1;
            for config in [&mut session.filter_config, &mut session.undo_config]
                .into_iter()
                .flatten()
            {
                if config.session_index != index {
                    warn!(
                        "session {index}: config stamped for session {}, restamping",
                        config.session_index
                    );
                    *config = config.for_session(index);
                }
            }
        }

        info!("loaded {} sessions", collection.len());
        self.sessions = collection;
        self.dirty = false;
        self.activate(1)
    }

    pub fn load_from(&mut self, path: &Path) -> Result<SessionView<'_>, WorkflowError> {
        match self.state {
            WorkflowState::AwaitingData => {}
            WorkflowState::Closed => return Err(WorkflowError::Closed),
            _ => return Err(WorkflowError::AlreadyLoaded),
        }
        let sessions = self.store.load(path)?;
        self.destination = Some(path.to_path_buf());
        self.load(sessions)
    }

    /// Gives up waiting for data.
    pub fn cancel_load(&mut self) -> Result<(), WorkflowError> {
        match self.state {
            WorkflowState::AwaitingData | WorkflowState::Closed => {
                self.state = WorkflowState::Closed;
                Ok(())
            }
            _ => Err(WorkflowError::AlreadyLoaded),
        }
    }

    pub fn view(&self) -> Result<SessionView<'_>, WorkflowError> {
        let index = self.ready_index()?;
        let record = &self.sessions[index - 1];
        Ok(SessionView {
            index,
            total: self.sessions.len(),
            record,
            completeness: evaluate(record).completeness,
            staged: self.staged,
            pending_resolution: self.pending.is_some(),
            dirty: self.dirty,
        })
    }

    pub fn navigate(&mut self, nav: Navigation) -> Result<SessionView<'_>, WorkflowError> {
        let index = self.ready_index()?;
        let total = self.sessions.len();
        let target = match nav {
            Navigation::Back => index.saturating_sub(1).max(1),
            Navigation::Next => (index + 1).min(total),
            Navigation::Jump(input) => match parse_jump(&input, total) {
                Some(target) => target,
                None => {
                    warn!("rejected jump target {input:?}, staying on session {index}");
                    return Err(WorkflowError::InvalidNavigationInput { input, index });
                }
            },
        };
        self.activate(target)
    }

    pub fn back(&mut self) -> Result<SessionView<'_>, WorkflowError> {
        self.navigate(Navigation::Back)
    }

    pub fn next(&mut self) -> Result<SessionView<'_>, WorkflowError> {
        self.navigate(Navigation::Next)
    }

    pub fn jump(&mut self, input: &str) -> Result<SessionView<'_>, WorkflowError> {
        self.navigate(Navigation::Jump(input.to_string()))
    }

    pub fn resolve(&mut self, resolution: Resolution) -> Result<SessionView<'_>, WorkflowError> {
        let index = self.ready_index()?;
        if self.pending.is_none() {
            return Err(WorkflowError::NothingToResolve(index));
        }
        let outcome = self.orchestrator.process(
            &mut self.sessions[index - 1],
            index,
            ProcessRequest::Resolve(resolution),
        )?;
        info!("session {index}: resolved with {resolution}");
        self.pending = None;
        self.absorb(&outcome);
        self.view()
    }

    /// Stages a parameter edit. It takes effect on `apply_filter` or when
    /// navigation leaves the session.
    pub fn set_filter_config(&mut self, patch: FilterPatch) -> Result<SessionView<'_>, WorkflowError> {
        let index = self.ready_index()?;
        self.require_resolved(index)?;
        let base = self
            .staged
            .unwrap_or_else(|| self.orchestrator.current_config(&self.sessions[index - 1], index));
        self.staged = Some(base.with_patch(&patch)?);
        self.dirty = true;
        self.view()
    }

    /// Re-runs the algorithm with the staged (or current) configuration.
    pub fn apply_filter(&mut self) -> Result<SessionView<'_>, WorkflowError> {
        let index = self.ready_index()?;
        self.require_resolved(index)?;
        let config = self
            .staged
            .unwrap_or_else(|| self.orchestrator.current_config(&self.sessions[index - 1], index));
        let outcome = self.orchestrator.process(
            &mut self.sessions[index - 1],
            index,
            ProcessRequest::Rerun(config),
        )?;
        self.staged = None;
        self.absorb(&outcome);
        self.view()
    }

    /// Restores the previous configuration. Only one level is kept; undoing
    /// twice returns to where the first undo started.
    pub fn undo_filter(&mut self) -> Result<SessionView<'_>, WorkflowError> {
        let index = self.ready_index()?;
        self.require_resolved(index)?;
        let previous = self.sessions[index - 1]
            .undo_config
            .ok_or(WorkflowError::NothingToUndo(index))?;
        let outcome = self.orchestrator.process(
            &mut self.sessions[index - 1],
            index,
            ProcessRequest::Rerun(previous),
        )?;
        self.drop_staged(index);
        self.absorb(&outcome);
        self.view()
    }

    /// Hands `reconstructed` to the manual editor.
    pub fn edit_session(&mut self) -> Result<SessionView<'_>, WorkflowError> {
        let index = self.ready_index()?;
        self.require_resolved(index)?;
        let reconstructed = self.sessions[index - 1]
            .populated_reconstruction()
            .ok_or(WorkflowError::NothingToEdit(index))?;

        self.state = WorkflowState::Editing(index);
        let result = self.editor.edit(reconstructed);
        self.state = WorkflowState::Ready(index);

        match result? {
            EditOutcome::Accepted(edited) => {
                let outcome = self.orchestrator.accept_manual_edit(
                    &mut self.sessions[index - 1],
                    index,
                    edited,
                )?;
                self.absorb(&outcome);
                self.dirty = true;
            }
            EditOutcome::Discarded => info!("session {index}: manual edit discarded"),
        }
        self.view()
    }

    pub fn set_exclude_tag(&mut self, exclude: bool) -> Result<SessionView<'_>, WorkflowError> {
        let index = self.ready_index()?;
        self.require_resolved(index)?;
        self.sessions[index - 1].exclude = exclude;
        self.dirty = true;
        self.view()
    }

    /// Saves to the current destination. Without one this behaves like a
    /// cancelled save dialog.
    pub fn save(&mut self) -> Result<SaveOutcome, WorkflowError> {
        self.ready_index()?;
        match self.destination.clone() {
            Some(path) => self.save_to(path),
            None => {
                info!("save cancelled: no destination");
                Ok(SaveOutcome::Cancelled)
            }
        }
    }

    /// `None` is a cancelled destination picker.
    pub fn save_as(&mut self, destination: Option<PathBuf>) -> Result<SaveOutcome, WorkflowError> {
        self.ready_index()?;
        let Some(path) = destination else {
            info!("save-as cancelled");
            return Ok(SaveOutcome::Cancelled);
        };
        let outcome = self.save_to(path.clone())?;
        self.destination = Some(path);
        Ok(outcome)
    }

    /// Closes unless there are unsaved changes, in which case the caller has
    /// to come back through `close_with`.
    pub fn close(&mut self) -> Result<CloseOutcome, WorkflowError> {
        match self.state {
            WorkflowState::Closed => Ok(CloseOutcome::Closed),
            WorkflowState::AwaitingData => {
                self.state = WorkflowState::Closed;
                Ok(CloseOutcome::Closed)
            }
            _ if self.dirty => Err(WorkflowError::UnsavedChangesOnClose),
            _ => {
                self.state = WorkflowState::Closed;
                Ok(CloseOutcome::Closed)
            }
        }
    }

    pub fn close_with(&mut self, choice: CloseChoice) -> Result<CloseOutcome, WorkflowError> {
        if !matches!(self.state, WorkflowState::Ready(_)) {
            return self.close();
        }
        match choice {
            CloseChoice::Cancel => Ok(CloseOutcome::Cancelled),
            CloseChoice::Discard => {
                if self.dirty {
                    warn!("closing with unsaved changes discarded");
                }
                self.state = WorkflowState::Closed;
                Ok(CloseOutcome::Closed)
            }
            CloseChoice::Save => match self.save()? {
                SaveOutcome::Saved(_) => {
                    self.state = WorkflowState::Closed;
                    Ok(CloseOutcome::Closed)
                }
                SaveOutcome::Cancelled => Ok(CloseOutcome::Cancelled),
            },
        }
    }

    fn ready_index(&self) -> Result<usize, WorkflowError> {
        match self.state {
            WorkflowState::Ready(i) => Ok(i),
            WorkflowState::Closed => Err(WorkflowError::Closed),
            _ => Err(WorkflowError::NoActiveSession),
        }
    }

    fn require_resolved(&self, index: usize) -> Result<(), WorkflowError> {
        match &self.pending {
            Some(report) => Err(WorkflowError::ResolutionRequired {
                index,
                missing: report.unpopulated(),
            }),
            None => Ok(()),
        }
    }

    fn drop_staged(&mut self, index: usize) {
        if let Some(staged) = self.staged.take() {
            warn!(
                "session {index}: dropping unapplied filter edits {:?}",
                staged.params
            );
        }
    }

    /// Applies staged filter edits to the session being left.
    fn commit_staged(&mut self) -> Result<(), WorkflowError> {
        let (Ok(index), Some(staged)) = (self.ready_index(), self.staged) else {
            return Ok(());
        };
        let outcome = self.orchestrator.process(
            &mut self.sessions[index - 1],
            index,
            ProcessRequest::Reconfigure(staged),
        )?;
        info!("session {index}: committed filter edits on leaving");
        self.staged = None;
        self.absorb(&outcome);
        Ok(())
    }

    fn absorb(&mut self, outcome: &ProcessOutcome) {
        if outcome.modified() {
            self.dirty = true;
        }
    }

    fn activate(&mut self, target: usize) -> Result<SessionView<'_>, WorkflowError> {
        self.commit_staged()?;
        self.state = WorkflowState::Ready(target);
        self.pending = None;

        let outcome = self.orchestrator.process(
            &mut self.sessions[target - 1],
            target,
            ProcessRequest::Navigate,
        )?;
        if let ProcessOutcome::ResolutionRequired(report) = outcome {
            let missing = report.unpopulated();
            self.pending = Some(report);
            return Err(WorkflowError::ResolutionRequired {
                index: target,
                missing,
            });
        }
        self.absorb(&outcome);
        self.view()
    }

    fn save_to(&mut self, path: PathBuf) -> Result<SaveOutcome, WorkflowError> {
        let index = self.ready_index()?;
        self.state = WorkflowState::Saving;
        let result = self.store.save(&path, &self.sessions);
        self.state = WorkflowState::Ready(index);
        result.map_err(WorkflowError::PersistenceFailure)?;
        self.dirty = false;
        info!("saved {} sessions to {}", self.sessions.len(), path.display());
        Ok(SaveOutcome::Saved(path))
    }
}

/// Whole numbers only, clamped to `[1, total]`.
fn parse_jump(input: &str, total: usize) -> Option<usize> {
    let last = total.max(1);
    match input.trim().parse::<i64>() {
        Ok(n) => Some(n.clamp(1, last as i64) as usize),
        Err(e) => match e.kind() {
            IntErrorKind::PosOverflow => Some(last),
            IntErrorKind::NegOverflow => Some(1),
            _ => None,
        },
    }
}
