//! Per-session decision of what to (re)compute.
//!
//! A session is classified first, then exactly one of four things happens:
//! the automatic algorithm runs, the skip path backfills `reconstructed`,
//! only `output` is refreshed, or the caller is asked to resolve a partially
//! processed session. Every path computes into locals and commits at the end,
//! so an error leaves the session as it was.

use log::{debug, info};
use thiserror::Error;

use crate::completeness::{evaluate, Completeness, CompletenessReport};
use crate::filter::{FilterConfig, FilterParams};
use crate::reconstruct::{Reconstruction, ReconstructionError, Reconstructor};
use crate::resample::{resample, RateConversionError};
use crate::session::SessionRecord;
use crate::time_series::TimeSeries;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    RateConversion(#[from] RateConversionError),
    #[error(transparent)]
    Reconstruction(#[from] ReconstructionError),
}

/// Caller's choice for a partially processed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Resolution {
    /// Keep what is there; backfill `reconstructed` and derive `output`.
    Skip,
    /// Throw the partial fields away and run the algorithm.
    Run,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProcessRequest {
    /// Entering the session with no new instructions.
    Navigate,
    /// Run the algorithm with this configuration whatever the current state.
    Rerun(FilterConfig),
    /// Switch to this configuration. A manually edited session only gets a
    /// new `output`; anything else is re-run.
    Reconfigure(FilterConfig),
    Resolve(Resolution),
}

/// Where the skip path took `reconstructed` from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum SkipSource {
    Reconstructed,
    Output,
    Resampled,
    Raw,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Computed,
    Skipped(SkipSource),
    OutputRefreshed { changed: bool },
    ResolutionRequired(CompletenessReport),
}

impl ProcessOutcome {
    /// Whether the session's stored data changed.
    pub fn modified(&self) -> bool {
        match self {
            ProcessOutcome::Computed | ProcessOutcome::Skipped(_) => true,
            ProcessOutcome::OutputRefreshed { changed } => *changed,
            ProcessOutcome::ResolutionRequired(_) => false,
        }
    }
}

#[derive(Debug)]
pub struct Orchestrator<R> {
    reconstructor: R,
    defaults: FilterParams,
}

impl<R: Reconstructor> Orchestrator<R> {
    pub fn new(reconstructor: R, defaults: FilterParams) -> Self {
        Self {
            reconstructor,
            defaults,
        }
    }

    pub fn reconstructor(&self) -> &R {
        &self.reconstructor
    }

    /// The session's configuration stamped with `index`, or the defaults when
    /// it has none.
    pub fn current_config(&self, session: &SessionRecord, index: usize) -> FilterConfig {
        session
            .filter_config
            .map(|c| c.for_session(index))
            .unwrap_or_else(|| FilterConfig::new(self.defaults, index))
    }

    pub fn process(
        &self,
        session: &mut SessionRecord,
        index: usize,
        request: ProcessRequest,
    ) -> Result<ProcessOutcome, ProcessError> {
        let report = evaluate(session);
        let current = self.current_config(session, index);

        if let ProcessRequest::Rerun(next) | ProcessRequest::Reconfigure(next) = request {
            let next = next.for_session(index);
            let keep_edit = matches!(request, ProcessRequest::Reconfigure(_)) && session.manual_changes;
            if let Some(edited) = session.populated_reconstruction().filter(|_| keep_edit) {
                let output = resample(edited, next.resample_rate())?;
                snapshot_config(session, current, &next);
                info!("session {index}: manual edit kept, output for {:?}", next.params);
                return Ok(refresh_output(session, next, output));
            }
            let (result, output) = self.run_automatic(session, &next)?;
            snapshot_config(session, current, &next);
            commit_run(session, next, result, output);
            info!("session {index}: re-ran with {:?}", next.params);
            return Ok(ProcessOutcome::Computed);
        }

        // A committed manual edit is never overwritten by navigation.
        if session.manual_changes {
            if let Some(edited) = session.populated_reconstruction() {
                let output = resample(edited, current.resample_rate())?;
                debug!("session {index}: manual edit present, output only");
                return Ok(refresh_output(session, current, output));
            }
        }

        match (report.completeness, request) {
            (Completeness::NotStarted, _) | (Completeness::Ambiguous, ProcessRequest::Resolve(Resolution::Run)) => {
                let (result, output) = self.run_automatic(session, &current)?;
                commit_run(session, current, result, output);
                info!("session {index}: reconstructed ({})", report.completeness);
                Ok(ProcessOutcome::Computed)
            }
            (Completeness::Ambiguous, ProcessRequest::Resolve(Resolution::Skip)) => {
                let (source, reconstructed) = skip_source(session);
                let output = resample(&reconstructed, current.resample_rate())?;
                session.reconstructed = Some(reconstructed);
                session.output = Some(output);
                session.filter_config = Some(current);
                info!("session {index}: skipped, reconstructed taken from {source}");
                Ok(ProcessOutcome::Skipped(source))
            }
            (Completeness::Ambiguous, _) => {
                debug!(
                    "session {index}: ambiguous, unpopulated {:?}",
                    report.unpopulated()
                );
                Ok(ProcessOutcome::ResolutionRequired(report))
            }
            (Completeness::Complete, _) => {
                let reconstructed = session.populated_reconstruction().cloned().unwrap_or_default();
                let output = resample(&reconstructed, current.resample_rate())?;
                Ok(refresh_output(session, current, output))
            }
        }
    }

    /// Replaces `reconstructed` with an accepted manual edit and re-derives
    /// `output`. Later navigation will not re-run the algorithm over it.
    pub fn accept_manual_edit(
        &self,
        session: &mut SessionRecord,
        index: usize,
        edited: TimeSeries,
    ) -> Result<ProcessOutcome, ProcessError> {
        let current = self.current_config(session, index);
        let output = resample(&edited, current.resample_rate())?;
        session.reconstructed = Some(edited);
        session.manual_changes = true;
        info!("session {index}: manual edit accepted");
        Ok(refresh_output(session, current, output))
    }

    fn run_automatic(
        &self,
        session: &SessionRecord,
        config: &FilterConfig,
    ) -> Result<(Reconstruction, TimeSeries), ProcessError> {
        let result = self.reconstructor.reconstruct(session.raw(), config)?;
        let output = resample(&result.reconstructed, config.resample_rate())?;
        Ok((result, output))
    }
}

/// Remembers `current` for undo unless `next` changes nothing.
fn snapshot_config(session: &mut SessionRecord, current: FilterConfig, next: &FilterConfig) {
    if current.params != next.params {
        session.undo_config = Some(current);
    }
}

fn commit_run(session: &mut SessionRecord, config: FilterConfig, result: Reconstruction, output: TimeSeries) {
    session.clear_derived();
    session.filter_config = Some(config);
    session.velocity = Some(result.velocity);
    session.blink_onset = Some(result.blink_onset);
    session.blink_offset = Some(result.blink_offset);
    session.reconstructed = Some(result.reconstructed);
    session.output = Some(output);
}

fn refresh_output(session: &mut SessionRecord, config: FilterConfig, output: TimeSeries) -> ProcessOutcome {
    let changed = !session.output.as_ref().is_some_and(|o| o.same_bits(&output))
        || session.filter_config != Some(config);
    session.output = Some(output);
    session.filter_config = Some(config);
    ProcessOutcome::OutputRefreshed { changed }
}

/// Best available trace for the skip path: an existing reconstruction, then
/// `output`, then the resampled intermediate, then raw.
fn skip_source(session: &SessionRecord) -> (SkipSource, TimeSeries) {
    let populated = |s: &Option<TimeSeries>| s.as_ref().filter(|s| !s.is_empty()).cloned();

    if let Some(r) = populated(&session.reconstructed) {
        (SkipSource::Reconstructed, r)
    } else if let Some(o) = populated(&session.output) {
        (SkipSource::Output, o)
    } else if let Some(r) = populated(&session.resampled) {
        (SkipSource::Resampled, r)
    } else {
        (SkipSource::Raw, session.raw().clone())
    }
}
