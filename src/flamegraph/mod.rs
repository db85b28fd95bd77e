/// Frame coloring.
pub mod color;
mod svg;
mod tree;

pub use color::{color_for, Color, Palette};
pub use tree::{FlameNode, FlameTree, Frame};

use std::io;
use std::io::prelude::*;

use num_format::Locale;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use str_stack::StrStack;

const XPAD: usize = 10; // pad left and right
const FRAMEPAD: usize = 1; // vertical padding for frames

/// The default width of the frame canvas, in pixels.
pub const DEFAULT_WIDTH: usize = 1200;

/// Which way stacks grow.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub enum Direction {
    /// Root at the bottom, callees stacked upwards.
    #[default]
    Straight,
    /// Root at the top, callees hanging below (an "icicle" graph).
    Inverted,
}

/// Configure the flame graph.
#[derive(Debug, Clone)]
pub struct Options {
    /// Width of the frame canvas in pixels. The image is `2 * 10` pixels wider for padding.
    ///
    /// [Default value](DEFAULT_WIDTH).
    pub width: usize,

    /// Height of each frame in pixels.
    pub frame_height: usize,

    /// Font size of frame labels.
    pub font_size: usize,

    /// Average glyph width relative to `font_size`, used to decide how much of a label fits.
    pub font_width: f64,

    /// Frames narrower than this many pixels are drawn without a label.
    pub min_label_width: f64,

    /// Title drawn at the top of the image.
    pub title: String,

    /// Optional second line below the title.
    pub subtitle: Option<String>,

    /// What the counts are, as shown in tooltips ("samples").
    pub count_name: String,

    /// The palette frames are colored from.
    pub palette: Palette,

    /// Whether the graph grows upwards or hangs downwards.
    pub direction: Direction,

    /// Free text embedded in the image as a `<desc>` element.
    pub notes: Option<String>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            width: DEFAULT_WIDTH,
            frame_height: 16,
            font_size: 12,
            font_width: 0.59,
            min_label_width: 0.0,
            title: "Flame Graph".to_string(),
            subtitle: None,
            count_name: "samples".to_string(),
            palette: Palette::default(),
            direction: Direction::default(),
            notes: None,
        }
    }
}

impl Options {
    // pad top, includes title (and subtitle if any)
    fn ypad1(&self) -> usize {
        if self.subtitle.is_some() {
            self.font_size * 5
        } else {
            self.font_size * 3
        }
    }

    // pad bottom
    fn ypad2(&self) -> usize {
        self.font_size * 2 + 10
    }
}

/// Failure to produce a flame graph.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// The input held no samples; a placeholder image was written instead.
    #[error("no stack counts found")]
    NoSamples,

    /// Reading the folded input failed.
    #[error("could not read folded stacks: {0}")]
    Io(#[from] io::Error),

    /// Writing the SVG failed.
    #[error("could not write svg: {0}")]
    Xml(#[from] quick_xml::Error),
}

/// What was drawn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderSummary {
    /// Samples across all stacks.
    pub total_samples: usize,
    /// Rectangles drawn, including the root.
    pub frames: usize,
    /// Deepest stack depth drawn.
    pub max_depth: usize,
    /// Input lines that were not valid folded stacks.
    pub ignored_lines: usize,
}

macro_rules! args {
    ($($key:expr => $value:expr),*) => {{
        [$(($key, $value),)*]
    }};
}

/// Produce a flame graph from an iterator over folded stack lines.
///
/// Lines are drawn in the order given: a frame's callees are laid out left to right in the
/// order they first appear. Pass sorted lines (as the collapser writes them) for an
/// alphabetical graph.
pub fn from_lines<'a, I, W>(
    opt: &Options,
    lines: I,
    writer: W,
) -> Result<RenderSummary, RenderError>
where
    I: IntoIterator<Item = &'a str>,
    W: Write,
{
    let tree = FlameTree::from_lines(lines);
    if tree.ignored() != 0 {
        warn!("Ignored {} lines with invalid format", tree.ignored());
    }
    from_tree(opt, &tree, writer)
}

/// Produce a flame graph from an already built call tree.
pub fn from_tree<W>(
    opt: &Options,
    tree: &FlameTree<'_>,
    writer: W,
) -> Result<RenderSummary, RenderError>
where
    W: Write,
{
    let mut buffer = StrStack::new();
    let mut svg = Writer::new(writer);
    let image_width = opt.width + 2 * XPAD;

    let timemax = tree.total();
    if timemax == 0 {
        error!("No stack counts found");
        // emit an error message SVG, for tools automating flamegraph use
        let dims = svg::Dimensions {
            image_width,
            image_height: opt.font_size * 5,
        };
        svg::write_header(&mut svg, dims)?;
        svg::write_str(
            &mut svg,
            &mut buffer,
            svg::TextItem {
                color: "black",
                size: opt.font_size + 2,
                x: (image_width / 2) as f64,
                y: (opt.font_size * 2) as f64,
                text: "ERROR: No valid input provided to flamegraph".into(),
                location: Some("middle"),
                extra: None,
            },
        )?;
        svg.write_event(Event::End(BytesEnd::new("svg")))?;
        svg::newline(&mut svg)?;
        return Err(RenderError::NoSamples);
    }

    let frames = tree.frames();
    let depthmax = frames.iter().map(|f| f.depth).max().unwrap_or(0);
    let image_height = ((depthmax + 1) * opt.frame_height) + opt.ypad1() + opt.ypad2();
    let dims = svg::Dimensions {
        image_width,
        image_height,
    };

    svg::write_header(&mut svg, dims)?;
    svg::write_prelude(&mut svg, dims, opt, color::bgcolors_for(opt.palette))?;

    // offsets stay in sample units until here
    let widthpertime = opt.width as f64 / timemax as f64;
    let mut samples_txt_buffer = num_format::Buffer::default();
    svg.write_event(Event::Start(
        BytesStart::new("g").with_attributes(args!("id" => "frames")),
    ))?;
    svg::newline(&mut svg)?;
    for frame in &frames {
        let x1 = XPAD as f64 + frame.start as f64 * widthpertime;
        let x2 = XPAD as f64 + frame.end as f64 * widthpertime;
        let (y1, y2) = match opt.direction {
            Direction::Straight => {
                let y1 = image_height - opt.ypad2() - (frame.depth + 1) * opt.frame_height
                    + FRAMEPAD;
                let y2 = image_height - opt.ypad2() - frame.depth * opt.frame_height;
                (y1, y2)
            }
            Direction::Inverted => {
                let y1 = opt.ypad1() + frame.depth * opt.frame_height;
                let y2 = opt.ypad1() + (frame.depth + 1) * opt.frame_height - FRAMEPAD;
                (y1, y2)
            }
        };

        let samples = frame.samples();

        // add thousands separators to `samples`
        let _ = samples_txt_buffer.write_formatted(&samples, &Locale::en);
        let samples_txt = samples_txt_buffer.as_str();

        let info = if frame.depth == 0 {
            write!(buffer, "all ({} {}, 100%)", samples_txt, opt.count_name)
        } else {
            let pct = samples as f64 * 100.0 / timemax as f64;
            write!(
                buffer,
                "{} ({} {}, {:.2}%)",
                deannotate(frame.name),
                samples_txt,
                opt.count_name,
                pct
            )
        };

        let color = if frame.depth == 0 {
            "rgb(160,160,160)".to_string()
        } else {
            color_for(opt.palette, frame.name).to_string()
        };
        let x = write!(buffer, "{:.2}", x1);
        let y = write!(buffer, "{}", y1);
        let width = write!(buffer, "{:.2}", x2 - x1);
        let height = write!(buffer, "{}", y2 - y1);

        svg.write_event(Event::Start(
            BytesStart::new("g").with_attributes(args!("class" => "func_g")),
        ))?;
        svg.write_event(Event::Start(BytesStart::new("title")))?;
        svg.write_event(Event::Text(BytesText::new(&buffer[info])))?;
        svg.write_event(Event::End(BytesEnd::new("title")))?;
        svg.write_event(Event::Empty(BytesStart::new("rect").with_attributes(args!(
            "x" => &buffer[x],
            "y" => &buffer[y],
            "width" => &buffer[width],
            "height" => &buffer[height],
            "fill" => color.as_str()
        ))))?;

        let frame_width = x2 - x1;
        let fitchars = (frame_width / (opt.font_size as f64 * opt.font_width)).trunc() as usize;
        if fitchars >= 3 && frame_width >= opt.min_label_width {
            // room for one char plus two dots
            let f = if frame.depth == 0 {
                "all"
            } else {
                deannotate(frame.name)
            };

            let text: svg::TextArgument<'_> = if f.chars().count() < fitchars {
                f.into()
            } else {
                // need to truncate :'(
                let mut truncated = String::with_capacity(fitchars + 1);
                truncated.extend(f.chars().take(fitchars - 2));
                truncated.push_str("..");
                truncated.into()
            };

            svg::write_str(
                &mut svg,
                &mut buffer,
                svg::TextItem {
                    color: "rgb(0,0,0)",
                    size: opt.font_size,
                    x: x1 + 3.0,
                    y: 3.0 + (y1 + y2) as f64 / 2.0,
                    text,
                    location: None,
                    extra: None,
                },
            )?;
        } else {
            svg::newline(&mut svg)?;
        }

        buffer.clear();
        svg.write_event(Event::End(BytesEnd::new("g")))?;
        svg::newline(&mut svg)?;
    }

    svg.write_event(Event::End(BytesEnd::new("g")))?;
    svg::newline(&mut svg)?;
    svg.write_event(Event::End(BytesEnd::new("svg")))?;
    svg::newline(&mut svg)?;

    Ok(RenderSummary {
        total_samples: timemax,
        frames: frames.len(),
        max_depth: depthmax,
        ignored_lines: tree.ignored(),
    })
}

/// Produce a flame graph from a reader that contains a sequence of folded stack lines.
///
/// See [`from_lines`] for the expected format and the order lines are drawn in.
pub fn from_reader<R, W>(
    opt: &Options,
    mut reader: R,
    writer: W,
) -> Result<RenderSummary, RenderError>
where
    R: Read,
    W: Write,
{
    let mut input = String::new();
    reader.read_to_string(&mut input)?;
    from_lines(opt, input.lines(), writer)
}

/// Produce a flame graph from a set of readers that contain folded stack lines.
///
/// The lines of all readers are sorted before drawing, so the result does not depend on the
/// order the readers are given in.
pub fn from_readers<R, W>(
    opt: &Options,
    readers: R,
    writer: W,
) -> Result<RenderSummary, RenderError>
where
    R: IntoIterator,
    R::Item: Read,
    W: Write,
{
    let mut input = String::new();
    for mut reader in readers {
        reader.read_to_string(&mut input)?;
        if !input.is_empty() && !input.ends_with('\n') {
            input.push('\n');
        }
    }

    let mut lines: Vec<&str> = input.lines().collect();
    lines.sort_unstable();
    from_lines(opt, lines, writer)
}

// strip the `_[k]` style annotations added by the collapser
fn deannotate(f: &str) -> &str {
    if f.ends_with(']') {
        if let Some(ai) = f.rfind("_[") {
            if f[ai..].len() == 4 && "kwij".contains(&f[ai + 2..ai + 3]) {
                return &f[..ai];
            }
        }
    }
    f
}
