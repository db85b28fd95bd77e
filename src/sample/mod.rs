/// Sampling with Linux `perf record`.
pub mod perf;

/// Replaying samples that were recorded earlier.
pub mod replay;

pub use self::perf::PerfSource;
pub use self::replay::ReplaySource;

use std::ffi::OsString;
use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitStatus;

/// The program to profile and what to feed it.
#[derive(Debug, Clone, Default)]
pub struct Target {
    /// Path to the executable.
    pub program: PathBuf,
    /// Arguments passed to the executable.
    pub args: Vec<OsString>,
    /// File streamed to the program's standard input. `None` leaves stdin empty.
    pub stdin: Option<PathBuf>,
}

impl Target {
    /// A target with no arguments and no input.
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        Target {
            program: program.into(),
            ..Default::default()
        }
    }
}

/// How the profiled program ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildExit {
    /// It returned this exit code.
    Code(i32),
    /// It was killed by this signal.
    Signal(i32),
}

impl ChildExit {
    /// Whether the program exited normally with code 0.
    pub fn success(self) -> bool {
        self == ChildExit::Code(0)
    }

    pub(crate) fn from_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return ChildExit::Code(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ChildExit::Signal(signal);
            }
        }
        ChildExit::Code(-1)
    }
}

impl fmt::Display for ChildExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ChildExit::Code(code) => write!(f, "exit code {}", code),
            ChildExit::Signal(signal) => write!(f, "signal {}", signal),
        }
    }
}

/// The profiled program did not finish cleanly. Samples taken before it stopped are kept.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{} terminated with {exit}", program.display())]
pub struct ChildProcessError {
    /// The program that failed.
    pub program: PathBuf,
    /// How it ended.
    pub exit: ChildExit,
}

/// The outcome of a completed recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recording {
    /// The program that was profiled.
    pub program: PathBuf,
    /// How it ended.
    pub exit: ChildExit,
}

impl Recording {
    /// The failure to report if the program did not exit cleanly.
    pub fn child_error(&self) -> Option<ChildProcessError> {
        if self.exit.success() {
            None
        } else {
            Some(ChildProcessError {
                program: self.program.clone(),
                exit: self.exit,
            })
        }
    }
}

/// Failure to capture samples. All of these stop the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum SampleError {
    /// The platform lacks something sampling needs.
    #[error("sampling unavailable: missing {capability}: {detail}")]
    Unavailable {
        /// The capability that is missing.
        capability: String,
        /// What we found out about it.
        detail: String,
    },

    /// The profiled program could not be started.
    #[error("could not start {}: {source}", program.display())]
    Spawn {
        /// The program we tried to start.
        program: PathBuf,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// The input file for the program could not be opened.
    #[error("could not open input {}: {source}", path.display())]
    Input {
        /// The input file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// The recorder ran but failed to produce samples.
    #[error("{tool} failed ({status}): {stderr}")]
    Recorder {
        /// The tool that failed.
        tool: &'static str,
        /// How it exited.
        status: ChildExit,
        /// The tail of what it printed.
        stderr: String,
    },

    /// Moving samples into the raw artifact failed.
    #[error("i/o error while sampling: {0}")]
    Io(#[from] io::Error),
}

/// A way of capturing call stacks from a running program.
///
/// Implementations write the samples they capture to `raw` as `perf script` text, which
/// [`crate::collapse::perf::Folder`] reads back.
pub trait SampleSource {
    /// A short name for log messages.
    fn name(&self) -> &'static str;

    /// Checks that this source can work on this machine.
    ///
    /// Callers probe once before [`SampleSource::record`]; `record` does not probe again.
    fn probe(&self) -> Result<(), SampleError> {
        Ok(())
    }

    /// Runs `target` to completion while sampling it.
    ///
    /// `scratch` is a directory the source may use for its own files. It returns once the
    /// program has exited and every sample has been written to `raw`. A program that crashes is
    /// not an error here: the returned [`Recording`] carries its exit.
    fn record(
        &mut self,
        target: &Target,
        scratch: &Path,
        raw: &mut dyn Write,
    ) -> Result<Recording, SampleError>;
}
