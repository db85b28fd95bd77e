use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};

use super::{ChildExit, Recording, SampleError, SampleSource, Target};

/// Feeds back `perf script` output that was captured on an earlier run.
///
/// Nothing is executed. This is how profiles taken on another machine are turned into flame
/// graphs, and how the rest of the pipeline is exercised without `perf`.
#[derive(Debug, Clone)]
pub struct ReplaySource {
    script: PathBuf,
    exit: ChildExit,
}

impl ReplaySource {
    /// Replays the samples in `script` and reports a clean exit.
    pub fn new<P: Into<PathBuf>>(script: P) -> Self {
        ReplaySource {
            script: script.into(),
            exit: ChildExit::Code(0),
        }
    }

    /// Reports `exit` as the way the recorded program ended.
    pub fn with_exit(mut self, exit: ChildExit) -> Self {
        self.exit = exit;
        self
    }
}

impl SampleSource for ReplaySource {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn probe(&self) -> Result<(), SampleError> {
        match self.script.metadata() {
            Ok(m) if m.is_file() => Ok(()),
            Ok(_) => Err(SampleError::Input {
                path: self.script.clone(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"),
            }),
            Err(source) => Err(SampleError::Input {
                path: self.script.clone(),
                source,
            }),
        }
    }

    fn record(
        &mut self,
        target: &Target,
        _scratch: &Path,
        raw: &mut dyn Write,
    ) -> Result<Recording, SampleError> {
        let file = File::open(&self.script).map_err(|source| SampleError::Input {
            path: self.script.clone(),
            source,
        })?;
        info!("replaying samples from {}", self.script.display());
        let bytes = io::copy(&mut BufReader::new(file), raw)?;
        debug!("replayed {} bytes", bytes);

        Ok(Recording {
            program: target.program.clone(),
            exit: self.exit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn copies_script_verbatim() {
        let dir = std::env::temp_dir().join(format!("flamepipe-replay-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let script = dir.join("day1.perf");
        let text = "day1 42/42 1.0: cycles:\n\t1 main (/x/day1)\n\n";
        fs::write(&script, text).unwrap();

        let mut source = ReplaySource::new(&script).with_exit(ChildExit::Signal(11));
        source.probe().unwrap();
        let mut raw = Vec::new();
        let recording = source
            .record(&Target::new("day1"), &dir, &mut raw)
            .unwrap();
        fs::remove_dir_all(&dir).unwrap();

        assert_eq!(raw, text.as_bytes());
        assert_eq!(recording.exit, ChildExit::Signal(11));
        assert!(recording.child_error().is_some());
    }

    #[test]
    fn missing_script_is_an_input_error() {
        let mut source = ReplaySource::new("/nonexistent/flamepipe/day1.perf");
        assert!(matches!(source.probe(), Err(SampleError::Input { .. })));
        let err = source
            .record(&Target::new("day1"), Path::new("."), &mut io::sink())
            .unwrap_err();
        assert!(matches!(err, SampleError::Input { .. }));
    }
}
