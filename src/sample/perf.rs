use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::str::FromStr;
use std::thread;

use super::{ChildExit, Recording, SampleError, SampleSource, Target};

const PARANOID_PATH: &str = "/proc/sys/kernel/perf_event_paranoid";
const SCRIPT_FIELDS: &str = "comm,pid,tid,time,event,ip,sym,dso";
const STDERR_TAIL: usize = 20;
const CAPTURED_MARKER: &str = "[ perf record: Captured and wrote";

/// The default sampling frequency, in Hz. Odd to avoid lockstep with periodic work.
pub const DEFAULT_FREQUENCY: u32 = 997;

/// How `perf record` walks the stack.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CallGraph {
    /// Follow frame pointers. Cheap, but release builds usually omit them.
    FramePointer,
    /// Copy a chunk of the stack and unwind it with DWARF info afterwards.
    #[default]
    Dwarf,
    /// Use the CPU's last branch record.
    Lbr,
}

impl CallGraph {
    fn as_arg(self) -> &'static str {
        match self {
            CallGraph::FramePointer => "fp",
            CallGraph::Dwarf => "dwarf",
            CallGraph::Lbr => "lbr",
        }
    }
}

impl FromStr for CallGraph {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fp" => Ok(CallGraph::FramePointer),
            "dwarf" => Ok(CallGraph::Dwarf),
            "lbr" => Ok(CallGraph::Lbr),
            unknown => Err(format!("unknown call graph mode: {}", unknown)),
        }
    }
}

/// Settings for sampling with `perf`.
#[derive(Debug, Clone)]
pub struct Options {
    /// Samples per second.
    pub frequency: u32,

    /// How stacks are unwound.
    pub call_graph: CallGraph,

    /// The `perf` executable to run.
    pub perf: PathBuf,

    /// Extra arguments for `perf record`, placed before the target.
    pub record_args: Vec<OsString>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            frequency: DEFAULT_FREQUENCY,
            call_graph: CallGraph::default(),
            perf: PathBuf::from("perf"),
            record_args: Vec::new(),
        }
    }
}

/// Samples a program with `perf record` and symbolizes the result with `perf script`.
///
/// `perf record` launches the target itself, so sampling starts with the program's first
/// instruction. The target's stdin is redirected from the input file; perf's stderr (which the
/// target shares) is drained on a background thread while we wait for the recording to end.
#[derive(Debug, Clone, Default)]
pub struct PerfSource {
    opt: Options,
}

impl From<Options> for PerfSource {
    fn from(opt: Options) -> Self {
        PerfSource { opt }
    }
}

impl PerfSource {
    fn unavailable(capability: &str, detail: impl Into<String>) -> SampleError {
        SampleError::Unavailable {
            capability: capability.to_string(),
            detail: detail.into(),
        }
    }

    fn check_paranoid() -> Result<(), SampleError> {
        let level = match fs::read_to_string(PARANOID_PATH) {
            Ok(level) => level,
            Err(e) => {
                return Err(Self::unavailable(
                    "kernel perf_events support",
                    format!("cannot read {}: {}", PARANOID_PATH, e),
                ))
            }
        };
        let level: i32 = match level.trim().parse() {
            Ok(level) => level,
            Err(_) => {
                warn!("unexpected contents in {}: {:?}", PARANOID_PATH, level.trim());
                return Ok(());
            }
        };
        debug!("perf_event_paranoid is {}", level);

        // 2 still allows user-space sampling of our own processes
        if level >= 3 && !is_root() {
            return Err(Self::unavailable(
                "perf_event_open access",
                format!(
                    "{} is {}; set it to 2 or lower, or run as root",
                    PARANOID_PATH, level
                ),
            ));
        }
        Ok(())
    }

    fn record_command(&self, target: &Target, data: &Path, stdin: Stdio) -> Command {
        let mut cmd = Command::new(&self.opt.perf);
        cmd.arg("record")
            .arg("-F")
            .arg(self.opt.frequency.to_string())
            .arg("--call-graph")
            .arg(self.opt.call_graph.as_arg())
            .arg("-o")
            .arg(data)
            .args(&self.opt.record_args)
            .arg("--")
            .arg(&target.program)
            .args(&target.args)
            .stdin(stdin)
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        cmd
    }

    fn script_command(&self, data: &Path) -> Command {
        let mut cmd = Command::new(&self.opt.perf);
        cmd.arg("script")
            .arg("-i")
            .arg(data)
            .arg("-F")
            .arg(SCRIPT_FIELDS)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    // figure out why `perf record` left no data behind
    fn diagnose(&self, target: &Target, exit: ChildExit, stderr: Vec<String>) -> SampleError {
        let text = stderr.join("\n");
        if text.contains("Workload failed") {
            return SampleError::Spawn {
                program: target.program.clone(),
                source: io::Error::new(io::ErrorKind::Other, text),
            };
        }
        if text.contains("perf_event_paranoid") || text.contains("Permission denied") {
            return Self::unavailable("perf_event_open access", text);
        }
        if text.contains("not supported") {
            return Self::unavailable("a sampling event supported by this CPU", text);
        }
        SampleError::Recorder {
            tool: "perf record",
            status: exit,
            stderr: text,
        }
    }
}

impl SampleSource for PerfSource {
    fn name(&self) -> &'static str {
        "perf"
    }

    fn probe(&self) -> Result<(), SampleError> {
        let status = Command::new(&self.opt.perf)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match status {
            Ok(status) if status.success() => {}
            Ok(status) => {
                return Err(Self::unavailable(
                    "the `perf` tool",
                    format!(
                        "`{} --version` exited with {}",
                        self.opt.perf.display(),
                        ChildExit::from_status(status)
                    ),
                ))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Self::unavailable(
                    "the `perf` tool",
                    format!("{} was not found on PATH", self.opt.perf.display()),
                ))
            }
            Err(e) => return Err(Self::unavailable("the `perf` tool", e.to_string())),
        }

        Self::check_paranoid()
    }

    fn record(
        &mut self,
        target: &Target,
        scratch: &Path,
        raw: &mut dyn Write,
    ) -> Result<Recording, SampleError> {
        // perf would only tell us "Workload failed" after the fact
        if let Err(source) = fs::metadata(&target.program) {
            return Err(SampleError::Spawn {
                program: target.program.clone(),
                source,
            });
        }

        let stdin = match target.stdin {
            Some(ref path) => {
                let file = File::open(path).map_err(|source| SampleError::Input {
                    path: path.clone(),
                    source,
                })?;
                Stdio::from(file)
            }
            None => Stdio::null(),
        };

        let data = scratch.join("perf.data");
        info!(
            "sampling {} at {} Hz ({} call graphs)",
            target.program.display(),
            self.opt.frequency,
            self.opt.call_graph.as_arg()
        );
        let mut recorder = self
            .record_command(target, &data, stdin)
            .spawn()
            .map_err(|e| Self::unavailable("the `perf` tool", e.to_string()))?;
        let stderr = drain_lines(recorder.stderr.take(), "perf record");

        let status = recorder.wait()?;
        let stderr = stderr.join().unwrap_or_default();
        let exit = ChildExit::from_status(status);
        debug!("perf record exited with {}", exit);

        // perf exits with the target's status, so a failing target alone is no reason to give
        // up as long as a recording was written
        let recorded = fs::metadata(&data).map(|m| m.len() > 0).unwrap_or(false);
        if !recorded {
            return Err(self.diagnose(target, exit, stderr));
        }
        if !stderr.iter().any(|l| l.contains(CAPTURED_MARKER)) {
            warn!("perf record did not confirm writing {}", data.display());
        }

        let mut script = self
            .script_command(&data)
            .spawn()
            .map_err(|e| Self::unavailable("the `perf` tool", e.to_string()))?;
        let script_stderr = drain_lines(script.stderr.take(), "perf script");
        if let Some(mut out) = script.stdout.take() {
            io::copy(&mut out, raw)?;
        }
        let status = script.wait()?;
        let script_stderr = script_stderr.join().unwrap_or_default();
        if !status.success() {
            return Err(SampleError::Recorder {
                tool: "perf script",
                status: ChildExit::from_status(status),
                stderr: script_stderr.join("\n"),
            });
        }

        Ok(Recording {
            program: target.program.clone(),
            exit,
        })
    }
}

// Reads a child's stderr to the end on a separate thread so it can never fill the pipe and
// stall the child. Keeps the last few lines for error reports.
fn drain_lines<R>(pipe: Option<R>, tool: &'static str) -> thread::JoinHandle<Vec<String>>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut tail = Vec::with_capacity(STDERR_TAIL);
        let pipe = match pipe {
            Some(pipe) => pipe,
            None => return tail,
        };
        for line in BufReader::new(pipe).lines() {
            let line = match line {
                Ok(line) => line,
                Err(_) => break,
            };
            debug!("{}: {}", tool, line);
            if tail.len() == STDERR_TAIL {
                tail.remove(0);
            }
            tail.push(line);
        }
        tail
    })
}

#[cfg(unix)]
fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
fn is_root() -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_graph_modes_parse() {
        assert_eq!("fp".parse::<CallGraph>(), Ok(CallGraph::FramePointer));
        assert_eq!("dwarf".parse::<CallGraph>(), Ok(CallGraph::Dwarf));
        assert!("frame".parse::<CallGraph>().is_err());
    }

    #[test]
    fn record_command_runs_target_under_perf() {
        let source = PerfSource::from(Options {
            frequency: 499,
            call_graph: CallGraph::FramePointer,
            ..Default::default()
        });
        let mut target = Target::new("/aoc/target/release/day1");
        target.args.push("--part".into());
        target.args.push("2".into());
        let cmd = source.record_command(&target, Path::new("/tmp/x/perf.data"), Stdio::null());

        assert_eq!(cmd.get_program(), "perf");
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            vec![
                "record",
                "-F",
                "499",
                "--call-graph",
                "fp",
                "-o",
                "/tmp/x/perf.data",
                "--",
                "/aoc/target/release/day1",
                "--part",
                "2",
            ]
        );
    }

    #[test]
    fn missing_perf_is_unavailable() {
        let source = PerfSource::from(Options {
            perf: PathBuf::from("/nonexistent/flamepipe-test/perf"),
            ..Default::default()
        });
        match source.probe() {
            Err(SampleError::Unavailable { capability, .. }) => {
                assert_eq!(capability, "the `perf` tool")
            }
            other => panic!("expected unavailable, got {:?}", other),
        }
    }

    #[test]
    fn record_without_perf_is_unavailable() {
        let mut source = PerfSource::from(Options {
            perf: PathBuf::from("/nonexistent/flamepipe-test/perf"),
            ..Default::default()
        });
        let program = std::env::current_exe().unwrap();
        let mut raw = Vec::new();
        let err = source
            .record(&Target::new(program), &std::env::temp_dir(), &mut raw)
            .unwrap_err();
        assert!(matches!(err, SampleError::Unavailable { .. }), "{:?}", err);
        assert!(raw.is_empty());
    }

    #[test]
    fn diagnoses_permission_problems() {
        let source = PerfSource::default();
        let target = Target::new("day1");
        let err = source.diagnose(
            &target,
            ChildExit::Code(255),
            vec![
                "Error: Access to performance monitoring is restricted, consider tweaking \
                 /proc/sys/kernel/perf_event_paranoid"
                    .into(),
            ],
        );
        assert!(matches!(err, SampleError::Unavailable { .. }));

        let err = source.diagnose(
            &target,
            ChildExit::Code(255),
            vec!["Workload failed: Exec format error".into()],
        );
        assert!(matches!(err, SampleError::Spawn { .. }));
    }
}
