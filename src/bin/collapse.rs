use std::io::{self, Write};
use std::path::PathBuf;
use std::process;

use clap::{ArgAction, Parser};
use env_logger::Env;
use flamepipe::collapse::perf::{Folder, Options};
use flamepipe::collapse::{Collapse, CollapseError};
use is_terminal::IsTerminal;
use log::warn;

#[derive(Debug, Parser)]
#[clap(
    name = "flamepipe-collapse",
    about,
    after_help = "\
[1] perf script must emit both PID and TIDs for these to work:
        perf script -F comm,pid,tid,time,event,ip,sym,dso
    flamepipe itself records with exactly these fields."
)]
struct Opt {
    // ************* //
    // *** FLAGS *** //
    // ************* //
    /// Include raw addresses where symbols can't be found
    #[clap(long = "addrs")]
    addrs: bool,

    /// Annotate kernel functions with a _[k]
    #[clap(long = "kernel")]
    kernel: bool,

    /// Include PID with process names [1]
    #[clap(long = "pid")]
    pid: bool,

    /// Include TID and PID with process names [1]
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
    /// Event filter [default: first encountered event]
    #[clap(long = "event-filter", value_name = "STRING")]
    event_filter: Option<String>,

    // ************ //
    // *** ARGS *** //
    // ************ //
    /// Perf script output file, or STDIN if not specified
    #[clap(value_name = "PATH")]
    infile: Option<PathBuf>,
}

impl Opt {
    fn into_parts(self) -> (Option<PathBuf>, Options) {
        (
            self.infile,
            Options {
                include_pid: self.pid,
                include_tid: self.tid,
                include_addrs: self.addrs,
                annotate_kernel: self.kernel,
                event_filter: self.event_filter,
            },
        )
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

    let (infile, options) = opt.into_parts();
    if infile.is_none() && io::stdin().is_terminal() {
        warn!("reading perf script output from the terminal; pipe it in or pass a file");
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let result = Folder::from(options)
        .collapse_file(infile.as_ref(), &mut out)
        .and_then(|_| out.flush().map_err(CollapseError::from));
    match result {
        Ok(()) => {}
        Err(CollapseError::Io(ref e)) if e.kind() == io::ErrorKind::BrokenPipe => {}
        Err(e) => {
            eprintln!("flamepipe-collapse: {}", e);
            let code = match e {
                CollapseError::Parse(_) => 5,
                _ => 1,
            };
            process::exit(code);
        }
    }
}
