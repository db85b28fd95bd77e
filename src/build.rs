//! Producing the executable that gets profiled.

use std::env;
use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use serde::Deserialize;

use crate::sample::ChildExit;

/// Failure to produce an executable.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// The build tool could not be started.
    #[error("could not run {}: {source}", tool.display())]
    Spawn {
        /// The build tool.
        tool: PathBuf,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// The build ran and failed. `diagnostic` is what the build tool printed, unmodified.
    #[error("build failed ({status}):\n{diagnostic}")]
    Failed {
        /// How the build tool exited.
        status: ChildExit,
        /// The build tool's own error output.
        diagnostic: String,
    },

    /// The build succeeded without producing the requested executable.
    #[error("build produced no executable named `{target}`")]
    NoExecutable {
        /// The executable that was requested.
        target: String,
    },
}

/// Something that turns a target name into a freshly built executable.
pub trait Builder {
    /// Builds `target` and returns the path of its executable.
    fn build(&mut self, target: &str) -> Result<PathBuf, BuildError>;
}

/// A builder that skips building and always hands out the same executable.
#[derive(Debug, Clone)]
pub struct Prebuilt(pub PathBuf);

impl Builder for Prebuilt {
    fn build(&mut self, target: &str) -> Result<PathBuf, BuildError> {
        debug!("using prebuilt {} for {}", self.0.display(), target);
        Ok(self.0.clone())
    }
}

/// Builds binaries with `cargo build` in an optimized profile.
#[derive(Debug, Clone)]
pub struct CargoBuilder {
    /// The cargo executable. Defaults to `$CARGO`, then `cargo`.
    pub cargo: PathBuf,

    /// Passed as `--manifest-path`.
    pub manifest_path: Option<PathBuf>,

    /// Passed as `--package`.
    pub package: Option<String>,

    /// Passed as `--features`.
    pub features: Option<String>,

    /// A custom profile. `None` builds with `--release`.
    pub profile: Option<String>,
}

impl Default for CargoBuilder {
    fn default() -> Self {
        CargoBuilder {
            cargo: env::var_os("CARGO")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("cargo")),
            manifest_path: None,
            package: None,
            features: None,
            profile: None,
        }
    }
}

impl CargoBuilder {
    fn command(&self, target: &str) -> Command {
        let mut cmd = Command::new(&self.cargo);
        cmd.arg("build");
        match self.profile {
            Some(ref profile) => {
                cmd.arg("--profile").arg(profile);
            }
            None => {
                cmd.arg("--release");
            }
        }
        cmd.arg("--bin").arg(target);
        if let Some(ref manifest_path) = self.manifest_path {
            cmd.arg("--manifest-path").arg(manifest_path);
        }
        if let Some(ref package) = self.package {
            cmd.arg("--package").arg(package);
        }
        if let Some(ref features) = self.features {
            cmd.arg("--features").arg(features);
        }
        cmd.arg("--message-format=json-render-diagnostics")
            .stdin(Stdio::null());
        cmd
    }
}

impl Builder for CargoBuilder {
    fn build(&mut self, target: &str) -> Result<PathBuf, BuildError> {
        let mut cmd = self.command(target);
        info!(
            "building {} with {}",
            target,
            display_args(cmd.get_args().map(|a| a.to_os_string()))
        );

        let output = cmd.output().map_err(|source| BuildError::Spawn {
            tool: self.cargo.clone(),
            source,
        })?;
        if !output.status.success() {
            return Err(BuildError::Failed {
                status: ChildExit::from_status(output.status),
                diagnostic: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        match find_executable(&String::from_utf8_lossy(&output.stdout), target) {
            Some(exe) => {
                debug!("built {}", exe.display());
                Ok(exe)
            }
            None => Err(BuildError::NoExecutable {
                target: target.to_string(),
            }),
        }
    }
}

fn display_args<I: Iterator<Item = OsString>>(args: I) -> String {
    args.map(|a| a.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Deserialize)]
struct Message {
    reason: String,
    #[serde(default)]
    target: Option<ArtifactTarget>,
    #[serde(default)]
    executable: Option<PathBuf>,
}

#[derive(Deserialize)]
struct ArtifactTarget {
    name: String,
    #[serde(default)]
    kind: Vec<String>,
}

/// Finds the executable for binary `target` in cargo's `--message-format=json` output.
///
/// Lines that are not JSON (cargo lets build scripts print to stdout) are skipped.
pub(crate) fn find_executable(messages: &str, target: &str) -> Option<PathBuf> {
    let mut found = None;
    for line in messages.lines() {
        let msg: Message = match serde_json::from_str(line) {
            Ok(msg) => msg,
            Err(_) => continue,
        };
        if msg.reason != "compiler-artifact" {
            continue;
        }
        let is_target = msg
            .target
            .as_ref()
            .map(|t| t.name == target && t.kind.iter().any(|k| k == "bin"))
            .unwrap_or(false);
        if is_target && msg.executable.is_some() {
            found = msg.executable;
        }
    }
    found
}
