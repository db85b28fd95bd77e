//! Running build, sampling, collapsing and rendering in sequence.
//!
//! A [`Pipeline`] owns one [`Builder`] and one [`SampleSource`] and moves through
//! [`State`]s strictly in order. The first stage to fail ends the run in [`State::Failed`];
//! nothing after it is attempted. A profiled program that crashes does not fail the run: its
//! samples are still rendered and the [`Report`] carries a [`ChildProcessError`].

use std::ffi::OsString;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::build::{BuildError, Builder};
use crate::collapse::{self, perf::Folder, CollapseError, Occurrences};
use crate::flamegraph::{self, RenderError};
use crate::sample::{ChildExit, ChildProcessError, SampleError, SampleSource, Target};

/// Where the pipeline writes its image unless told otherwise.
pub const DEFAULT_OUTPUT: &str = "flamegraph.svg";

const RAW_FILE: &str = "raw.perf";
const FOLDED_FILE: &str = "stacks.folded";

static RUNS: AtomicUsize = AtomicUsize::new(0);

/// Where a pipeline run is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Not started.
    Idle,
    /// Producing the executable.
    Building,
    /// Running the executable under the sampler.
    Sampling,
    /// Folding samples into collapsed stacks.
    Collapsing,
    /// Drawing the flame graph.
    Rendering,
    /// The image was written.
    Done,
    /// A stage failed.
    Failed,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            State::Idle => "idle",
            State::Building => "build",
            State::Sampling => "sample",
            State::Collapsing => "collapse",
            State::Rendering => "render",
            State::Done => "done",
            State::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Configure a pipeline run.
#[derive(Debug, Clone)]
pub struct Options {
    /// The binary to build and profile.
    pub target: String,

    /// Arguments for the profiled program.
    pub target_args: Vec<OsString>,

    /// File fed to the profiled program's standard input.
    pub input: Option<PathBuf>,

    /// Where the SVG goes.
    ///
    /// [Default value](DEFAULT_OUTPUT): `flamegraph.svg`.
    pub output: PathBuf,

    /// Directory under which the per-run work directory is created.
    ///
    /// Default value: the system temporary directory.
    pub work_dir: Option<PathBuf>,

    /// Leave the raw samples and collapsed stacks behind when the run ends.
    pub keep_intermediates: bool,

    /// How samples are folded.
    pub collapse: collapse::perf::Options,

    /// How the flame graph is drawn.
    pub flamegraph: flamegraph::Options,
}

impl Options {
    /// Options for profiling `target` with everything else at its default.
    pub fn new<S: Into<String>>(target: S) -> Self {
        Options {
            target: target.into(),
            target_args: Vec::new(),
            input: None,
            output: PathBuf::from(DEFAULT_OUTPUT),
            work_dir: None,
            keep_intermediates: false,
            collapse: Default::default(),
            flamegraph: Default::default(),
        }
    }
}

/// What a finished run produced.
#[derive(Debug, Clone)]
pub struct Report {
    /// Always [`State::Done`] for a report returned by [`Pipeline::run`].
    pub state: State,

    /// The SVG that was written.
    pub output: PathBuf,

    /// Samples captured and rendered.
    pub total_samples: usize,

    /// Distinct call paths among them.
    pub distinct_stacks: usize,

    /// How the profiled program ended.
    pub child_exit: ChildExit,

    /// Set when the profiled program did not exit cleanly.
    pub child_error: Option<ChildProcessError>,

    /// The raw samples and collapsed stacks, if they were kept.
    pub intermediates: Option<(PathBuf, PathBuf)>,
}

impl Report {
    /// 0 for a clean run, 4 when the profiled program failed even though its image was written.
    pub fn exit_code(&self) -> i32 {
        if self.child_error.is_some() {
            4
        } else {
            0
        }
    }
}

/// The stage that stopped a run, and why.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Building the target failed.
    #[error(transparent)]
    Build(#[from] BuildError),

    /// Sampling could not be done, or the target could not be started.
    #[error(transparent)]
    Sample(#[from] SampleError),

    /// The samples could not be parsed.
    #[error(transparent)]
    Collapse(#[from] CollapseError),

    /// The flame graph could not be drawn.
    #[error(transparent)]
    Render(#[from] RenderError),

    /// Moving data between stages failed.
    #[error("could not {action} {}: {source}", path.display())]
    Io {
        /// The stage that was running.
        stage: State,
        /// What we were doing.
        action: &'static str,
        /// The file involved.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: io::Error,
    },
}

impl PipelineError {
    /// The stage that failed.
    pub fn stage(&self) -> State {
        match *self {
            PipelineError::Build(_) => State::Building,
            PipelineError::Sample(_) => State::Sampling,
            PipelineError::Collapse(_) => State::Collapsing,
            PipelineError::Render(_) => State::Rendering,
            PipelineError::Io { stage, .. } => stage,
        }
    }

    /// The process exit code that identifies this failure.
    ///
    /// 1 for I/O, 2 for the build, 3 when sampling is impossible, 4 when the profiled program
    /// could not be started, 5 for unparseable samples and 6 for rendering.
    pub fn exit_code(&self) -> i32 {
        match *self {
            PipelineError::Build(_) => 2,
            PipelineError::Sample(SampleError::Spawn { .. }) => 4,
            PipelineError::Sample(SampleError::Input { .. }) => 1,
            PipelineError::Sample(_) => 3,
            PipelineError::Collapse(_) => 5,
            PipelineError::Render(_) => 6,
            PipelineError::Io { .. } => 1,
        }
    }
}

// Removes itself when dropped unless asked to keep its contents.
struct WorkDir {
    path: PathBuf,
    keep: bool,
}

impl WorkDir {
    fn create(base: Option<&Path>, keep: bool) -> io::Result<Self> {
        let base = base.map(Path::to_path_buf).unwrap_or_else(std::env::temp_dir);
        let run = RUNS.fetch_add(1, Ordering::Relaxed);
        let path = base.join(format!("flamepipe-{}-{}", process::id(), run));
        fs::create_dir_all(&path)?;
        debug!("work directory is {}", path.display());
        Ok(WorkDir { path, keep })
    }

    fn join(&self, file: &str) -> PathBuf {
        self.path.join(file)
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if self.keep {
            info!("keeping intermediates in {}", self.path.display());
            return;
        }
        if let Err(e) = fs::remove_dir_all(&self.path) {
            warn!("could not remove {}: {}", self.path.display(), e);
        }
    }
}

/// One profiling run: build, sample, collapse, render.
pub struct Pipeline {
    opt: Options,
    builder: Box<dyn Builder>,
    source: Box<dyn SampleSource>,
    state: State,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("opt", &self.opt)
            .field("source", &self.source.name())
            .field("state", &self.state)
            .finish()
    }
}

impl Pipeline {
    /// Prepares a run; nothing happens until [`Pipeline::run`].
    pub fn new(opt: Options, builder: Box<dyn Builder>, source: Box<dyn SampleSource>) -> Self {
        Pipeline {
            opt,
            builder,
            source,
            state: State::Idle,
        }
    }

    /// Where the run is, or where it stopped.
    pub fn state(&self) -> State {
        self.state
    }

    /// Runs every stage to completion, stopping at the first failure.
    pub fn run(&mut self) -> Result<Report, PipelineError> {
        match self.run_stages() {
            Ok(report) => {
                self.enter(State::Done);
                Ok(Report {
                    state: State::Done,
                    ..report
                })
            }
            Err(e) => {
                error!("{} stage failed: {}", e.stage(), e);
                self.enter(State::Failed);
                Err(e)
            }
        }
    }

    fn enter(&mut self, state: State) {
        info!("{} -> {}", self.state, state);
        self.state = state;
    }

    fn run_stages(&mut self) -> Result<Report, PipelineError> {
        self.enter(State::Building);
        let program = self.builder.build(&self.opt.target)?;

        self.enter(State::Sampling);
        self.source.probe()?;
        let work = WorkDir::create(self.opt.work_dir.as_deref(), self.opt.keep_intermediates)
            .map_err(|source| PipelineError::Io {
                stage: State::Sampling,
                action: "create work directory",
                path: self.opt.work_dir.clone().unwrap_or_else(std::env::temp_dir),
                source,
            })?;
        let raw_path = work.join(RAW_FILE);
        let target = Target {
            program,
            args: self.opt.target_args.clone(),
            stdin: self.opt.input.clone(),
        };
        let recording = {
            let io_err = |source: io::Error| PipelineError::Io {
                stage: State::Sampling,
                action: "write",
                path: raw_path.clone(),
                source,
            };
            let mut raw = BufWriter::new(File::create(&raw_path).map_err(io_err)?);
            let recording = self.source.record(&target, &work.path, &mut raw)?;
            raw.flush().map_err(io_err)?;
            recording
        };
        let child_error = recording.child_error();
        if let Some(ref e) = child_error {
            warn!("{}; rendering the samples taken before it stopped", e);
        }

        self.enter(State::Collapsing);
        let folded_path = work.join(FOLDED_FILE);
        let occurrences = {
            let raw = File::open(&raw_path).map_err(|source| PipelineError::Io {
                stage: State::Collapsing,
                action: "open",
                path: raw_path.clone(),
                source,
            })?;
            let mut occurrences = Occurrences::new();
            let mut folder = Folder::from(self.opt.collapse.clone());
            let samples = folder.fold_into(
                BufReader::with_capacity(collapse::CAPACITY_READER, raw),
                &mut occurrences,
            )?;
            info!(
                "collapsed {} samples into {} distinct stacks",
                samples,
                occurrences.len()
            );

            let io_err = |source: io::Error| PipelineError::Io {
                stage: State::Collapsing,
                action: "write",
                path: folded_path.clone(),
                source,
            };
            let mut folded = BufWriter::new(File::create(&folded_path).map_err(io_err)?);
            occurrences.write(&mut folded).map_err(io_err)?;
            folded.flush().map_err(io_err)?;
            occurrences
        };

        self.enter(State::Rendering);
        let mut stacks = String::new();
        File::open(&folded_path)
            .and_then(|mut f| f.read_to_string(&mut stacks))
            .map_err(|source| PipelineError::Io {
                stage: State::Rendering,
                action: "read",
                path: folded_path.clone(),
                source,
            })?;
        self.render(&stacks)?;

        let intermediates = if self.opt.keep_intermediates {
            Some((raw_path, folded_path))
        } else {
            None
        };
        Ok(Report {
            state: self.state,
            output: self.opt.output.clone(),
            total_samples: occurrences.total(),
            distinct_stacks: occurrences.len(),
            child_exit: recording.exit,
            child_error,
            intermediates,
        })
    }

    // Draws into a sibling of the output and renames it into place, so a failed render never
    // leaves a half-written image. The no-samples placeholder is the one error that is kept.
    fn render(&self, stacks: &str) -> Result<(), PipelineError> {
        let output = &self.opt.output;
        let tmp = temporary_sibling(output);
        let io_err = |action: &'static str, path: &Path| {
            let path = path.to_path_buf();
            move |source: io::Error| PipelineError::Io {
                stage: State::Rendering,
                action,
                path,
                source,
            }
        };

        let file = File::create(&tmp).map_err(io_err("create", &tmp))?;
        let mut writer = BufWriter::new(file);
        let rendered = flamegraph::from_lines(&self.opt.flamegraph, stacks.lines(), &mut writer);
        let keep = match &rendered {
            Ok(summary) => {
                debug!("drew {} frames, {} deep", summary.frames, summary.max_depth);
                true
            }
            Err(RenderError::NoSamples) => true,
            Err(_) => false,
        };

        let flushed = writer.flush();
        if keep && flushed.is_ok() {
            fs::rename(&tmp, output).map_err(io_err("rename", output))?;
            info!("wrote {}", output.display());
        } else if let Err(e) = fs::remove_file(&tmp) {
            warn!("could not remove {}: {}", tmp.display(), e);
        }

        rendered?;
        flushed.map_err(io_err("write", &tmp))
    }
}

fn temporary_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| DEFAULT_OUTPUT.to_string());
    path.with_file_name(format!(".{}.{}.tmp", name, process::id()))
}
