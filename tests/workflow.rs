// Headless runs of the session workflow: a counting reconstructor, a scripted
// editor and an in-memory store stand in for the algorithm, the editor UI and
// the disk.

use std::path::PathBuf;

use assert_matches::assert_matches;
use blinkfix::{
    completeness::{classify, Completeness, DerivedField},
    editor::{EditOutcome, ScriptedEditor},
    filter::{FilterConfig, FilterParams, FilterPatch},
    gaps::{find_gaps, in_any_gap},
    orchestrator::{Orchestrator, ProcessRequest, Resolution},
    reconstruct::{BlinkInterpolator, CountingReconstructor},
    resample::RateConversionError,
    session::SessionRecord,
    store::{CollectionStore, MemoryStore},
    time_series::{markers_same_bits, TimeSeries},
    workflow::{CloseChoice, CloseOutcome, SaveOutcome, SessionWorkflow, WorkflowError, WorkflowState},
};

type Workflow = SessionWorkflow<CountingReconstructor<BlinkInterpolator>, ScriptedEditor, MemoryStore>;

/// 4 s at 60 Hz: a dropout at the start and a blink-sized hole in the middle.
fn raw(phase: f64) -> TimeSeries {
    let values = (0..240)
        .map(|k| {
            if k < 6 || (100..112).contains(&k) {
                f64::NAN
            } else {
                4.0 + 0.1 * (k as f64 / 60.0 * 3.0 + phase).sin()
            }
        })
        .collect();
    TimeSeries::uniform(0.0, 60.0, values).unwrap()
}

fn collection(n: usize) -> Vec<SessionRecord> {
    (0..n)
        .map(|i| SessionRecord::new(format!("p{:02}", i + 1), raw(i as f64 * 0.3)))
        .collect()
}

fn workflow() -> Workflow {
    SessionWorkflow::new(
        Orchestrator::new(
            CountingReconstructor::new(BlinkInterpolator),
            FilterParams::default(),
        ),
        ScriptedEditor::default(),
        MemoryStore::new(),
    )
}

fn calls(wf: &Workflow) -> usize {
    wf.orchestrator().reconstructor().calls()
}

fn hann(n: usize) -> FilterPatch {
    FilterPatch {
        hann_win: Some(n),
        ..FilterPatch::default()
    }
}

#[test]
fn first_session_yields_120hz_output_with_gaps_kept() {
    let mut wf = workflow();
    let view = wf.load(collection(2)).unwrap();
    assert_eq!(view.index, 1);
    assert_eq!(view.total, 2);
    assert_eq!(view.completeness, Completeness::Complete);

    let session = view.record;
    let reconstructed = session.reconstructed.as_ref().unwrap();
    let output = session.output.as_ref().unwrap();
    assert!(!output.is_empty());
    for pair in output.timestamps().windows(2) {
        assert!((pair[1] - pair[0] - 1.0 / 120.0).abs() < 1e-9);
    }

    // The leading dropout has no anchor, so it stays missing through to output.
    let gaps = find_gaps(reconstructed);
    assert!(!gaps.is_empty());
    for p in output.points() {
        assert_eq!(p.is_missing(), in_any_gap(&gaps, p.t), "t = {}", p.t);
    }
    let period = 1.0 / 120.0;
    for p in output.points().iter().filter(|p| p.is_missing()) {
        assert!(reconstructed
            .points()
            .iter()
            .any(|r| r.is_missing() && (r.t - p.t).abs() <= period));
    }

    assert!(wf.sessions()[1].output.is_none());
    assert_eq!(calls(&wf), 1);
}

#[test]
fn navigation_clamps_and_rejects_garbage() {
    let mut wf = workflow();
    wf.load(collection(3)).unwrap();

    assert_eq!(wf.jump("0").unwrap().index, 1);
    assert_eq!(wf.jump("4").unwrap().index, 3);
    assert_matches!(
        wf.jump("abc"),
        Err(WorkflowError::InvalidNavigationInput { index: 3, .. })
    );
    assert_eq!(wf.state(), WorkflowState::Ready(3));
    assert_matches!(wf.jump("1.5"), Err(WorkflowError::InvalidNavigationInput { .. }));

    assert_eq!(wf.next().unwrap().index, 3);
    assert_eq!(wf.back().unwrap().index, 2);
    assert_eq!(wf.back().unwrap().index, 1);
    assert_eq!(wf.back().unwrap().index, 1);
}

#[test]
fn complete_session_is_left_alone_on_revisit() {
    let mut wf = workflow();
    wf.load(collection(2)).unwrap();
    let before = wf.sessions()[0].clone();

    wf.next().unwrap();
    let view = wf.back().unwrap();
    let after = view.record;

    assert!(after.output.as_ref().unwrap().same_bits(before.output.as_ref().unwrap()));
    assert!(after
        .reconstructed
        .as_ref()
        .unwrap()
        .same_bits(before.reconstructed.as_ref().unwrap()));
    assert!(after.velocity.as_ref().unwrap().same_bits(before.velocity.as_ref().unwrap()));
    assert!(markers_same_bits(
        after.blink_onset.as_ref().unwrap(),
        before.blink_onset.as_ref().unwrap()
    ));
    assert!(markers_same_bits(
        after.blink_offset.as_ref().unwrap(),
        before.blink_offset.as_ref().unwrap()
    ));
    assert_eq!(after.filter_config, before.filter_config);
    assert_eq!(calls(&wf), 2);
}

#[test]
fn undo_restores_one_level() {
    let mut wf = workflow();
    wf.load(collection(1)).unwrap();

    wf.set_filter_config(hann(21)).unwrap();
    wf.apply_filter().unwrap();
    let config_a = wf.sessions()[0].filter_config.unwrap();
    wf.set_filter_config(hann(5)).unwrap();
    let view = wf.apply_filter().unwrap();
    assert_eq!(view.record.filter_config.unwrap().hann_win(), 5);

    let view = wf.undo_filter().unwrap();
    let undone = view.record;
    assert_eq!(undone.filter_config, Some(config_a));
    assert_eq!(undone.undo_config.unwrap().hann_win(), 5);

    let orc = Orchestrator::new(BlinkInterpolator, FilterParams::default());
    let mut alone = SessionRecord::new("p01", raw(0.0));
    orc.process(&mut alone, 1, ProcessRequest::Rerun(config_a)).unwrap();
    assert!(undone
        .reconstructed
        .as_ref()
        .unwrap()
        .same_bits(alone.reconstructed.as_ref().unwrap()));
    assert!(undone.output.as_ref().unwrap().same_bits(alone.output.as_ref().unwrap()));

    // One level only: a second undo flips back to B.
    let view = wf.undo_filter().unwrap();
    assert_eq!(view.record.filter_config.unwrap().hann_win(), 5);
}

#[test]
fn undo_without_history_is_refused() {
    let mut wf = workflow();
    wf.load(collection(1)).unwrap();
    assert_matches!(wf.undo_filter(), Err(WorkflowError::NothingToUndo(1)));
}

#[test]
fn staged_edits_take_effect_when_leaving_the_session() {
    let mut wf = workflow();
    wf.load(collection(2)).unwrap();

    let view = wf.set_filter_config(hann(21)).unwrap();
    assert_eq!(view.staged.unwrap().hann_win(), 21);
    assert!(view.dirty);
    assert_eq!(view.record.filter_config.unwrap().hann_win(), 11);
    assert_eq!(calls(&wf), 1);

    assert!(wf.next().unwrap().staged.is_none());
    assert_eq!(calls(&wf), 3);
    let view = wf.back().unwrap();
    assert_eq!(view.record.filter_config.unwrap().hann_win(), 21);
    assert_eq!(view.record.undo_config.unwrap().hann_win(), 11);
    assert_eq!(view.completeness, Completeness::Complete);
}

#[test]
fn rate_change_after_manual_edit_keeps_the_edit() {
    let mut first = SessionRecord::new("p01", raw(0.0));
    Orchestrator::new(BlinkInterpolator, FilterParams::default())
        .process(&mut first, 1, ProcessRequest::Navigate)
        .unwrap();
    let edited = first.reconstructed.unwrap().map_values(|v| v - 0.5);

    let mut wf = SessionWorkflow::new(
        Orchestrator::new(
            CountingReconstructor::new(BlinkInterpolator),
            FilterParams::default(),
        ),
        ScriptedEditor::new([EditOutcome::Accepted(edited.clone())]),
        MemoryStore::new(),
    );
    wf.load(collection(2)).unwrap();
    wf.edit_session().unwrap();
    wf.set_filter_config(FilterPatch {
        resample_rate: Some(60.0),
        ..FilterPatch::default()
    })
    .unwrap();
    wf.next().unwrap();

    let view = wf.back().unwrap();
    let record = view.record;
    assert!(record.manual_changes);
    assert!(record.reconstructed.as_ref().unwrap().same_bits(&edited));
    assert_eq!(record.filter_config.unwrap().resample_rate(), 60.0);
    assert_eq!(record.undo_config.unwrap().resample_rate(), 120.0);
    for pair in record.output.as_ref().unwrap().timestamps().windows(2) {
        assert!((pair[1] - pair[0] - 1.0 / 60.0).abs() < 1e-9);
    }
    assert_eq!(calls(&wf), 2);
}

#[test]
fn apply_without_changes_keeps_undo_history() {
    let mut wf = workflow();
    wf.load(collection(1)).unwrap();
    wf.set_filter_config(hann(21)).unwrap();
    wf.apply_filter().unwrap();

    let view = wf.apply_filter().unwrap();
    assert_eq!(view.record.filter_config.unwrap().hann_win(), 21);
    assert_eq!(view.record.undo_config.unwrap().hann_win(), 11);
}

#[test]
fn invalid_filter_value_is_rejected_without_staging() {
    let mut wf = workflow();
    wf.load(collection(1)).unwrap();
    let bad = FilterPatch {
        resample_rate: Some(-5.0),
        ..FilterPatch::default()
    };
    assert_matches!(
        wf.set_filter_config(bad),
        Err(WorkflowError::InvalidFilterConfig(_))
    );
    assert!(wf.view().unwrap().staged.is_none());
}

#[test]
fn manual_edit_short_circuits_the_algorithm() {
    let mut first = SessionRecord::new("p01", raw(0.0));
    Orchestrator::new(BlinkInterpolator, FilterParams::default())
        .process(&mut first, 1, ProcessRequest::Navigate)
        .unwrap();
    let edited = first.reconstructed.unwrap().map_values(|v| v + 1.0);

    let mut wf = SessionWorkflow::new(
        Orchestrator::new(
            CountingReconstructor::new(BlinkInterpolator),
            FilterParams::default(),
        ),
        ScriptedEditor::new([EditOutcome::Accepted(edited.clone())]),
        MemoryStore::new(),
    );
    wf.load(collection(2)).unwrap();
    let view = wf.edit_session().unwrap();
    assert!(view.record.manual_changes);
    assert!(view.dirty);
    assert!(view.record.reconstructed.as_ref().unwrap().same_bits(&edited));
    assert_eq!(wf.state(), WorkflowState::Ready(1));
    assert_eq!(wf.editor().seen.len(), 1);

    wf.next().unwrap();
    assert_eq!(calls(&wf), 2);
    let view = wf.back().unwrap();
    assert!(view.record.manual_changes);
    assert!(view.record.reconstructed.as_ref().unwrap().same_bits(&edited));
    assert_eq!(calls(&wf), 2);

    // An explicit re-run does replace the edit.
    wf.apply_filter().unwrap();
    assert_eq!(calls(&wf), 3);
    assert!(!wf.sessions()[0].manual_changes);
}

#[test]
fn discarded_edit_changes_nothing() {
    let mut wf = workflow();
    wf.load(collection(1)).unwrap();
    wf.save_as(Some(PathBuf::from("study.json"))).unwrap();
    let before = wf.sessions()[0].clone();

    let view = wf.edit_session().unwrap();
    assert!(!view.dirty);
    assert!(!view.record.manual_changes);
    assert!(view
        .record
        .reconstructed
        .as_ref()
        .unwrap()
        .same_bits(before.reconstructed.as_ref().unwrap()));
}

fn ambiguous_record() -> SessionRecord {
    let mut s = SessionRecord::new("amb", raw(0.0));
    let out: Vec<f64> = (0..480).map(|k| 3.0 + (k as f64 * 0.01).cos()).collect();
    s.output = Some(TimeSeries::uniform(0.0, 120.0, out).unwrap());
    s.velocity = Some(TimeSeries::uniform(0.0, 60.0, vec![0.0; 240]).unwrap());
    s.blink_onset = Some(vec![]);
    s
}

#[test]
fn ambiguous_session_skip_backfills_from_output() {
    let mut wf = workflow();
    let previous_output = ambiguous_record().output.unwrap();

    let err = wf.load(vec![ambiguous_record()]).unwrap_err();
    assert_matches!(err, WorkflowError::ResolutionRequired { index: 1, ref missing }
        if missing.contains(&DerivedField::BlinkOnset) && missing.contains(&DerivedField::Reconstructed));
    assert_eq!(wf.state(), WorkflowState::Ready(1));
    assert!(wf.view().unwrap().pending_resolution);
    assert_matches!(wf.apply_filter(), Err(WorkflowError::ResolutionRequired { .. }));
    assert_matches!(wf.set_exclude_tag(true), Err(WorkflowError::ResolutionRequired { .. }));

    let view = wf.resolve(Resolution::Skip).unwrap();
    assert!(!view.pending_resolution);
    assert!(view.record.reconstructed.as_ref().unwrap().same_bits(&previous_output));
    assert!(view.record.output.is_some());
    assert_eq!(view.record.blink_onset.as_ref().map(Vec::len), Some(0));
    assert!(view.record.blink_offset.is_none());
    assert_eq!(calls(&wf), 0);

    assert_matches!(wf.resolve(Resolution::Skip), Err(WorkflowError::NothingToResolve(1)));
}

#[test]
fn ambiguous_session_run_starts_over() {
    let mut wf = workflow();
    let _ = wf.load(vec![ambiguous_record(), SessionRecord::new("p02", raw(0.5))]);

    let view = wf.resolve(Resolution::Run).unwrap();
    assert_eq!(view.completeness, Completeness::Complete);
    assert_eq!(calls(&wf), 1);
}

#[test]
fn navigating_away_leaves_ambiguous_session_untouched() {
    let mut wf = workflow();
    let _ = wf.load(vec![ambiguous_record(), SessionRecord::new("p02", raw(0.5))]);
    wf.next().unwrap();
    assert_eq!(classify(&wf.sessions()[0]), Completeness::Ambiguous);
    assert!(wf.sessions()[0].reconstructed.is_none());
}

#[test]
fn too_short_raw_fails_without_touching_the_session() {
    let mut wf = workflow();
    let short = SessionRecord::new("short", TimeSeries::uniform(0.0, 60.0, vec![3.0]).unwrap());
    let err = wf.load(vec![short]).unwrap_err();
    assert_matches!(
        err,
        WorkflowError::InvalidRateConversionInput(RateConversionError::TooShort(1))
    );
    assert_eq!(wf.state(), WorkflowState::Ready(1));
    assert_eq!(classify(&wf.sessions()[0]), Completeness::NotStarted);
}

#[test]
fn invalid_record_fails_load_before_any_activation() {
    let mut wf = workflow();
    let mut sessions = collection(1);
    sessions.push(SessionRecord::new("empty", TimeSeries::default()));

    assert_matches!(
        wf.load(sessions),
        Err(WorkflowError::InvalidSessionRecord { index: 2, .. })
    );
    assert_eq!(wf.state(), WorkflowState::AwaitingData);
    assert!(wf.sessions().is_empty());
    assert_eq!(calls(&wf), 0);

    assert_matches!(wf.load(vec![]), Err(WorkflowError::EmptyCollection));
    assert_matches!(wf.next(), Err(WorkflowError::NoActiveSession));
}

#[test]
fn load_from_missing_artifact_is_a_persistence_failure() {
    let mut wf = workflow();
    assert_matches!(
        wf.load_from(&PathBuf::from("nowhere.json")),
        Err(WorkflowError::PersistenceFailure(_))
    );
    assert_eq!(wf.state(), WorkflowState::AwaitingData);
    assert!(wf.destination().is_none());
}

#[test]
fn save_requires_destination_and_close_guards_dirty_state() {
    let mut wf = workflow();
    let view = wf.load(collection(2)).unwrap();
    assert!(view.dirty);

    assert_eq!(wf.save().unwrap(), SaveOutcome::Cancelled);
    assert!(wf.is_dirty());
    assert_eq!(wf.save_as(None).unwrap(), SaveOutcome::Cancelled);
    assert!(wf.is_dirty());

    assert_matches!(wf.close(), Err(WorkflowError::UnsavedChangesOnClose));
    assert_eq!(wf.close_with(CloseChoice::Cancel).unwrap(), CloseOutcome::Cancelled);
    assert_eq!(wf.state(), WorkflowState::Ready(1));

    let path = PathBuf::from("study.json");
    assert_eq!(
        wf.save_as(Some(path.clone())).unwrap(),
        SaveOutcome::Saved(path.clone())
    );
    assert!(!wf.is_dirty());
    assert!(wf.store().contains(&path));
    assert_eq!(wf.destination(), Some(path.as_path()));

    wf.set_exclude_tag(true).unwrap();
    assert!(wf.is_dirty());
    assert_eq!(wf.close_with(CloseChoice::Save).unwrap(), CloseOutcome::Closed);
    assert_eq!(wf.state(), WorkflowState::Closed);
    assert!(wf.store().load(&path).unwrap()[0].exclude);

    assert_matches!(wf.next(), Err(WorkflowError::Closed));
}

#[test]
fn discard_closes_without_writing() {
    let mut wf = workflow();
    wf.load(collection(1)).unwrap();
    assert_eq!(wf.close_with(CloseChoice::Discard).unwrap(), CloseOutcome::Closed);
    assert_eq!(wf.state(), WorkflowState::Closed);
}

#[test]
fn failed_write_keeps_state() {
    let mut wf = workflow();
    wf.load(collection(1)).unwrap();
    wf.store().set_fail_writes(true);

    let path = PathBuf::from("study.json");
    assert_matches!(
        wf.save_as(Some(path.clone())),
        Err(WorkflowError::PersistenceFailure(_))
    );
    assert!(wf.is_dirty());
    assert!(wf.destination().is_none());
    assert_eq!(wf.state(), WorkflowState::Ready(1));

    wf.store().set_fail_writes(false);
    assert_matches!(wf.save_as(Some(path)), Ok(SaveOutcome::Saved(_)));
}

#[test]
fn load_from_store_remembers_destination_and_restamps_configs() {
    let store = MemoryStore::new();
    let path = PathBuf::from("study.json");
    let mut sessions = collection(2);
    sessions[1].filter_config = Some(FilterConfig::new(FilterParams::default(), 7));
    store.insert(&path, &sessions).unwrap();

    let mut wf = SessionWorkflow::new(
        Orchestrator::new(
            CountingReconstructor::new(BlinkInterpolator),
            FilterParams::default(),
        ),
        ScriptedEditor::default(),
        store,
    );
    wf.load_from(&path).unwrap();
    assert_eq!(wf.destination(), Some(path.as_path()));
    assert_eq!(wf.sessions()[1].filter_config.unwrap().session_index, 2);
    assert_matches!(wf.load(collection(1)), Err(WorkflowError::AlreadyLoaded));

    assert_eq!(wf.save().unwrap(), SaveOutcome::Saved(path));
}

#[test]
fn cancel_while_waiting_for_data_closes() {
    let mut wf = workflow();
    wf.cancel_load().unwrap();
    assert_eq!(wf.state(), WorkflowState::Closed);
    assert_matches!(wf.load(collection(1)), Err(WorkflowError::Closed));
}
