use std::ffi::OsString;
use std::path::PathBuf;
use std::process;

use clap::{ArgAction, Parser};
use env_logger::Env;
use flamepipe::build::{Builder, CargoBuilder, Prebuilt};
use flamepipe::collapse;
use flamepipe::flamegraph::{self, Direction, Palette};
use flamepipe::pipeline::{Options, Pipeline, DEFAULT_OUTPUT};
use flamepipe::sample::perf::{self, CallGraph, DEFAULT_FREQUENCY};
use flamepipe::sample::{PerfSource, ReplaySource, SampleSource};

#[derive(Debug, Parser)]
#[clap(
    name = "flamepipe",
    about,
    after_help = "\
Exit status identifies the stage that failed:
    1  usage or i/o error
    2  build failed
    3  sampling unavailable
    4  the profiled program failed to start, or did not exit cleanly
    5  samples could not be collapsed
    6  the flame graph could not be rendered"
)]
struct Opt {
    // ************* //
    // *** FLAGS *** //
    // ************* //
    /// Include raw addresses where symbols can't be found
    #[clap(long = "addrs")]
    addrs: bool,

    /// Plot the flame graph up-side-down
    #[clap(long = "inverted")]
    inverted: bool,

    /// Keep raw samples and collapsed stacks after the run
    #[clap(long = "keep-intermediates")]
    keep_intermediates: bool,

    /// Annotate kernel functions with a _[k]
    #[clap(long = "kernel")]
    kernel: bool,

    /// Include PID with process names
    #[clap(long = "pid")]
    pid: bool,

    /// Include TID and PID with process names
    #[clap(long = "tid")]
    tid: bool,

    /// Silence all log output
    #[clap(short = 'q', long = "quiet")]
    quiet: bool,

    /// Verbose logging mode (-v, -vv, -vvv)
    #[clap(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,

    // *************** //
    // *** OPTIONS *** //
    // *************** //
    /// How perf unwinds stacks
    #[clap(
        long = "call-graph",
        default_value = "dwarf",
        value_parser = ["dwarf", "fp", "lbr"],
        value_name = "MODE"
    )]
    call_graph: String,

    /// Set color palette
    #[clap(
        short = 'c',
        long = "colors",
        default_value = "hot",
        value_parser = [
            "hot", "mem", "io", "red", "green", "blue", "aqua", "yellow", "purple", "orange"
        ],
        value_name = "STRING"
    )]
    colors: String,

    /// Event filter [default: first encountered event]
    #[clap(long = "event-filter", value_name = "STRING")]
    event_filter: Option<String>,

    /// Space or comma separated features to build with
    #[clap(long = "features", value_name = "FEATURES")]
    features: Option<String>,

    /// Samples per second
    #[clap(short = 'F', long = "frequency", default_value_t = DEFAULT_FREQUENCY, value_name = "HZ")]
    frequency: u32,

    /// Path to the Cargo.toml of the project to build
    #[clap(long = "manifest-path", value_name = "PATH")]
    manifest_path: Option<PathBuf>,

    /// Where to write the flame graph
    #[clap(short = 'o', long = "output", default_value = DEFAULT_OUTPUT, value_name = "PATH")]
    output: PathBuf,

    /// Package that owns the target binary
    #[clap(short = 'p', long = "package", value_name = "SPEC")]
    package: Option<String>,

    /// Profile the target is built with [default: release]
    #[clap(long = "profile", value_name = "NAME")]
    profile: Option<String>,

    /// Profile this executable instead of building TARGET
    #[clap(long = "bin-path", value_name = "PATH")]
    bin_path: Option<PathBuf>,

    /// Render samples from a saved `perf script` output instead of running anything
    #[clap(long = "replay", value_name = "PATH")]
    replay: Option<PathBuf>,

    /// Change title text [default: TARGET]
    #[clap(long = "title", value_name = "STRING")]
    title: Option<String>,

    /// Width of the frame area
    #[clap(long = "width", default_value_t = flamegraph::DEFAULT_WIDTH, value_name = "UINT")]
    width: usize,

    /// Directory to create the run's work directory in [default: system temp dir]
    #[clap(long = "work-dir", value_name = "PATH")]
    work_dir: Option<PathBuf>,

    // ************ //
    // *** ARGS *** //
    // ************ //
    /// Binary to build and profile
    #[clap(value_name = "TARGET")]
    target: String,

    /// File fed to the program on standard input
    #[clap(value_name = "INPUT")]
    input: PathBuf,

    /// Arguments passed to the program
    #[clap(value_name = "ARGS", last = true)]
    args: Vec<OsString>,
}

impl Opt {
    fn into_parts(
        self,
    ) -> Result<(Options, Box<dyn Builder>, Box<dyn SampleSource>), String> {
        let palette: Palette = self.colors.parse()?;
        let call_graph: CallGraph = self.call_graph.parse()?;

        let builder: Box<dyn Builder> = match (self.bin_path, self.replay.as_ref()) {
            (Some(path), _) => Box::new(Prebuilt(path)),
            // nothing will run, so there is no point in building
            (None, Some(_)) => Box::new(Prebuilt(PathBuf::from(&self.target))),
            (None, None) => Box::new(CargoBuilder {
                manifest_path: self.manifest_path,
                package: self.package,
                features: self.features,
                profile: self.profile,
                ..Default::default()
            }),
        };

        let source: Box<dyn SampleSource> = match self.replay {
            Some(script) => Box::new(ReplaySource::new(script)),
            None => Box::new(PerfSource::from(perf::Options {
                frequency: self.frequency,
                call_graph,
                ..Default::default()
            })),
        };

        let mut opt = Options::new(self.target.clone());
        opt.target_args = self.args;
        opt.input = Some(self.input);
        opt.output = self.output;
        opt.work_dir = self.work_dir;
        opt.keep_intermediates = self.keep_intermediates;
        opt.collapse = collapse::perf::Options {
            include_pid: self.pid,
            include_tid: self.tid,
            include_addrs: self.addrs,
            annotate_kernel: self.kernel,
            event_filter: self.event_filter,
        };
        opt.flamegraph = flamegraph::Options {
            width: self.width,
            title: self.title.unwrap_or(self.target),
            palette,
            direction: if self.inverted {
                Direction::Inverted
            } else {
                Direction::Straight
            },
            ..Default::default()
        };

        Ok((opt, builder, source))
    }
}

fn main() {
    let opt = Opt::parse();

    // Initialize logger
    if !opt.quiet {
        env_logger::Builder::from_env(Env::default().default_filter_or(match opt.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }))
        .format_timestamp(None)
        .init();
    }

    let (options, builder, source) = match opt.into_parts() {
        Ok(parts) => parts,
        Err(e) => {
            eprintln!("flamepipe: {}", e);
            process::exit(1);
        }
    };

    let mut pipeline = Pipeline::new(options, builder, source);
    match pipeline.run() {
        Ok(report) => {
            eprintln!(
                "flamepipe: wrote {} ({} samples, {} distinct stacks)",
                report.output.display(),
                report.total_samples,
                report.distinct_stacks
            );
            if let Some((raw, folded)) = &report.intermediates {
                eprintln!("flamepipe: kept {} and {}", raw.display(), folded.display());
            }
            if let Some(ref e) = report.child_error {
                eprintln!("flamepipe: {}", e);
            }
            process::exit(report.exit_code());
        }
        Err(e) => {
            eprintln!("flamepipe: {} failed: {}", e.stage(), e);
            process::exit(e.exit_code());
        }
    }
}
