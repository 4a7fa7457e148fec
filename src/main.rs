use blinkfix::{
    completeness::classify,
    config::{Config, ConfigStore, FileConfigStore},
    editor::{CsvEditor, ManualEditor, ScriptedEditor},
    filter::FilterPatch,
    orchestrator::{Orchestrator, Resolution},
    reconstruct::BlinkInterpolator,
    store::{export_outputs, import_sessions, CollectionStore, JsonCollectionStore},
    session::SessionRecord,
    workflow::{SaveOutcome, SessionWorkflow, WorkflowError},
};
use clap::{error::ErrorKind, Args, CommandFactory, Parser, Subcommand};
use log::{info, warn};
use std::{
    error::Error,
    path::{Path, PathBuf},
};

/// blink-artifact repair for pupil recordings
#[derive(Parser, Debug)]
#[clap(version, about)]
pub struct Cli {
    /// config file to use instead of the per-user one
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// build a session collection from `time,value` CSV recordings
    Import {
        #[clap(required = true)]
        csv: Vec<PathBuf>,
        /// collection file to write
        #[clap(short, long)]
        out: PathBuf,
    },
    /// visit every session, reconstructing where needed, and save
    Process {
        /// collection file; defaults to the last one used
        collection: Option<PathBuf>,
        #[clap(flatten)]
        filter: FilterArgs,
        /// re-run every session with the given filter flags
        #[clap(long)]
        rerun: bool,
        /// keep partially processed sessions as they are
        #[clap(long, conflicts_with = "run_ambiguous")]
        skip_ambiguous: bool,
        /// discard partial results and reconstruct from scratch
        #[clap(long)]
        run_ambiguous: bool,
    },
    /// replace one session's reconstruction with a hand-corrected CSV
    Edit {
        collection: PathBuf,
        /// 1-based session number
        #[clap(short, long)]
        session: String,
        #[clap(long)]
        from: PathBuf,
    },
    /// tag a session so it is left out of exports
    Exclude {
        collection: PathBuf,
        #[clap(short, long)]
        session: String,
        /// remove the tag instead
        #[clap(long)]
        clear: bool,
    },
    /// write each session's output trace to its own CSV
    Export {
        collection: PathBuf,
        #[clap(short, long)]
        dir: PathBuf,
        #[clap(long)]
        include_excluded: bool,
    },
    /// print one line per session
    Summary {
        collection: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Clone, Copy)]
struct FilterArgs {
    /// Hann smoothing window in samples
    #[clap(long)]
    hann_win: Option<usize>,
    /// target rate of the output trace in Hz
    #[clap(long)]
    resample_rate: Option<f64>,
    /// working rate as a multiple of the recording rate
    #[clap(long)]
    resample_multiplier: Option<f64>,
    /// scale of the rebound (positive velocity) threshold
    #[clap(long)]
    pos_threshold: Option<f64>,
    /// scale of the onset (negative velocity) threshold
    #[clap(long)]
    neg_threshold: Option<f64>,
}

impl From<FilterArgs> for FilterPatch {
    fn from(a: FilterArgs) -> Self {
        FilterPatch {
            hann_win: a.hann_win,
            resample_rate: a.resample_rate,
            resample_multiplier: a.resample_multiplier,
            pos_threshold_multiplier: a.pos_threshold,
            neg_threshold_multiplier: a.neg_threshold,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum AmbiguousPolicy {
    Skip,
    Run,
    Leave,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let config_store = match &cli.config {
        Some(path) => FileConfigStore::with_path(path),
        None => FileConfigStore::new(),
    };
    let mut config = config_store.load();

    let used = match cli.command {
        Command::Import { csv, out } => {
            let sessions = import_sessions(&csv)?;
            JsonCollectionStore.save(&out, &sessions)?;
            println!("imported {} sessions into {}", sessions.len(), out.display());
            Some(out)
        }
        Command::Process {
            collection,
            filter,
            rerun,
            skip_ambiguous,
            run_ambiguous,
        } => {
            let collection = collection_or_last(collection, &config);
            let policy = if skip_ambiguous {
                AmbiguousPolicy::Skip
            } else if run_ambiguous {
                AmbiguousPolicy::Run
            } else {
                AmbiguousPolicy::Leave
            };
            process(&collection, &config, filter.into(), rerun, policy)?;
            Some(collection)
        }
        Command::Edit {
            collection,
            session,
            from,
        } => {
            let mut wf = workflow(&config, CsvEditor::new(&from));
            let index = open_at(&mut wf, &collection, &session)?;
            let edited = wf.edit_session()?.record.manual_changes;
            wf.save()?;
            if edited {
                println!("session {index}: manual edit saved");
            } else {
                println!("session {index}: nothing to apply from {}", from.display());
            }
            Some(collection)
        }
        Command::Exclude {
            collection,
            session,
            clear,
        } => {
            let mut wf = workflow(&config, ScriptedEditor::default());
            let index = open_at(&mut wf, &collection, &session)?;
            wf.set_exclude_tag(!clear)?;
            wf.save()?;
            println!(
                "session {index}: {}",
                if clear { "included" } else { "excluded" }
            );
            Some(collection)
        }
        Command::Export {
            collection,
            dir,
            include_excluded,
        } => {
            let sessions = JsonCollectionStore.load(&collection)?;
            let written = export_outputs(&sessions, &dir, include_excluded)?;
            println!("exported {} traces to {}", written.len(), dir.display());
            Some(collection)
        }
        Command::Summary { collection } => {
            let collection = collection_or_last(collection, &config);
            summary(&collection)?;
            Some(collection)
        }
    };

    if let Some(path) = used {
        let path = path.canonicalize().unwrap_or(path);
        if config.last_collection.as_ref() != Some(&path) {
            config.last_collection = Some(path);
            if let Err(e) = config_store.save(&config) {
                warn!("could not update {}: {e}", config_store.path().display());
            }
        }
    }
    Ok(())
}

fn collection_or_last(collection: Option<PathBuf>, config: &Config) -> PathBuf {
    match collection.or_else(|| config.last_collection.clone()) {
        Some(path) => path,
        None => {
            let mut cmd = Cli::command();
            cmd.error(
                ErrorKind::MissingRequiredArgument,
                "no collection given and none used before",
            )
            .exit()
        }
    }
}

fn workflow<E: ManualEditor>(
    config: &Config,
    editor: E,
) -> SessionWorkflow<BlinkInterpolator, E, JsonCollectionStore> {
    SessionWorkflow::new(
        Orchestrator::new(BlinkInterpolator, config.default_filter),
        editor,
        JsonCollectionStore,
    )
}

/// Loads the collection and moves to the requested session.
fn open_at<E: ManualEditor>(
    wf: &mut SessionWorkflow<BlinkInterpolator, E, JsonCollectionStore>,
    collection: &Path,
    session: &str,
) -> Result<usize, WorkflowError> {
    match wf.load_from(collection) {
        Ok(_) | Err(WorkflowError::ResolutionRequired { .. }) => {}
        Err(e) => return Err(e),
    }
    let index = wf.jump(session)?.index;
    Ok(index)
}

fn process(
    collection: &Path,
    config: &Config,
    patch: FilterPatch,
    rerun: bool,
    policy: AmbiguousPolicy,
) -> Result<(), Box<dyn Error>> {
    let mut wf = workflow(config, ScriptedEditor::default());
    let loaded = wf.load_from(collection).map(|_| ());
    if wf.sessions().is_empty() {
        return loaded.map_err(Into::into);
    }
    let total = wf.sessions().len();
    let mut pending_visit = Some(loaded);
    let mut failed = 0;

    for index in 1..=total {
        let visit = match pending_visit.take() {
            Some(v) => v,
            None => wf.next().map(|_| ()),
        };
        let resolved = match visit {
            Err(WorkflowError::ResolutionRequired { missing, .. }) => match policy {
                AmbiguousPolicy::Leave => {
                    warn!("session {index}: partially processed ({missing:?}), left as is");
                    continue;
                }
                AmbiguousPolicy::Skip => wf.resolve(Resolution::Skip).map(|_| ()),
                AmbiguousPolicy::Run => wf.resolve(Resolution::Run).map(|_| ()),
            },
            other => other,
        };
        let result = resolved.and_then(|()| {
            if rerun || !patch.is_empty() {
                wf.set_filter_config(patch)?;
                wf.apply_filter()?;
            }
            Ok(())
        });
        if let Err(e) = result {
            eprintln!("session {index}: {e}");
            failed += 1;
        }
    }

    if let SaveOutcome::Saved(path) = wf.save()? {
        info!("saved {}", path.display());
    }
    for (i, s) in wf.sessions().iter().enumerate() {
        print_line(i + 1, s);
    }
    if failed > 0 {
        return Err(format!("{failed} of {total} sessions could not be processed").into());
    }
    Ok(())
}

fn summary(collection: &Path) -> Result<(), Box<dyn Error>> {
    let sessions = JsonCollectionStore.load(collection)?;
    for (i, s) in sessions.iter().enumerate() {
        print_line(i + 1, s);
    }
    Ok(())
}

fn print_line(index: usize, s: &SessionRecord) {
    let blinks = s.blink_onset.as_ref().map_or(0, Vec::len);
    println!(
        "{index:>3} {:<20} {:>7} samples {:>5} missing  {:<11} {:>3} blinks{}{}",
        s.name,
        s.raw().len(),
        s.raw().missing_count(),
        classify(s).to_string(),
        blinks,
        if s.manual_changes { "  edited" } else { "" },
        if s.exclude { "  excluded" } else { "" },
    );
}
