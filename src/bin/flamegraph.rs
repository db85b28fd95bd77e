use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process;

use clap::{ArgAction, Parser};
use env_logger::Env;
use flamepipe::flamegraph::{self, Direction, Options, Palette, RenderError};

#[derive(Debug, Parser)]
#[clap(name = "flamepipe-flamegraph", about)]
struct Opt {
    // ************* //
    // *** FLAGS *** //
    // ************* //
    /// Plot the flame graph up-side-down
    #[clap(short = 'i', long = "inverted")]
    inverted: bool,

    /// Silence all log output
    #[clap(short = 'q', long = "quiet")]
    quiet: bool,

    /// Verbose logging mode (-v, -vv, -vvv)
    #[clap(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,

    // *************** //
    // *** OPTIONS *** //
    // *************** //
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

    /// Count type label
    #[clap(long = "countname", default_value = "samples", value_name = "STRING")]
    count_name: String,

    /// Height of each frame
    #[clap(long = "height", default_value = "16", value_name = "UINT")]
    frame_height: usize,

    /// Font size
    #[clap(long = "fontsize", default_value = "12", value_name = "UINT")]
    font_size: usize,

    /// Omit labels on frames narrower than this many pixels
    #[clap(long = "minwidth", default_value = "0", value_name = "FLOAT")]
    min_width: f64,

    /// Set embedded notes in SVG
    #[clap(long = "notes", value_name = "STRING")]
    notes: Option<String>,

    /// Second level title (optional)
    #[clap(long = "subtitle", value_name = "STRING")]
    subtitle: Option<String>,

    /// Change title text
    #[clap(long = "title", default_value = "Flame Graph", value_name = "STRING")]
    title: String,

    /// Width of the frame area
    #[clap(long = "width", default_value = "1200", value_name = "UINT")]
    width: usize,

    // ************ //
    // *** ARGS *** //
    // ************ //
    /// Collapsed perf output files. With no PATH, or PATH is -, read STDIN.
    #[clap(value_name = "PATH")]
    infiles: Vec<PathBuf>,
}

impl Opt {
    fn into_parts(self) -> Result<(Vec<PathBuf>, Options), String> {
        let palette: Palette = self.colors.parse()?;
        let options = Options {
            width: self.width,
            frame_height: self.frame_height,
            font_size: self.font_size,
            min_label_width: self.min_width,
            title: self.title,
            subtitle: self.subtitle,
            count_name: self.count_name,
            palette,
            direction: if self.inverted {
                Direction::Inverted
            } else {
                Direction::Straight
            },
            notes: self.notes,
            ..Default::default()
        };
        Ok((self.infiles, options))
    }
}

fn open(path: &Path) -> io::Result<Box<dyn Read>> {
    if path.as_os_str() == "-" {
        Ok(Box::new(io::stdin()))
    } else {
        Ok(Box::new(BufReader::new(File::open(path)?)))
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

    let (infiles, options) = match opt.into_parts() {
        Ok(parts) => parts,
        Err(e) => {
            eprintln!("flamepipe-flamegraph: {}", e);
            process::exit(1);
        }
    };

    let mut readers = Vec::with_capacity(infiles.len().max(1));
    if infiles.is_empty() {
        readers.push(Box::new(io::stdin()) as Box<dyn Read>);
    }
    for infile in &infiles {
        match open(infile) {
            Ok(r) => readers.push(r),
            Err(e) => {
                eprintln!("flamepipe-flamegraph: {}: {}", infile.display(), e);
                process::exit(1);
            }
        }
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let result = flamegraph::from_readers(&options, readers, &mut out)
        .and_then(|_| out.flush().map_err(RenderError::from));
    match result {
        Ok(()) => {}
        Err(RenderError::Io(ref e)) if e.kind() == io::ErrorKind::BrokenPipe => {}
        Err(e) => {
            eprintln!("flamepipe-flamegraph: {}", e);
            process::exit(6);
        }
    }
}
