use std::borrow::Cow;
use std::io::prelude::*;
use std::iter;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use str_stack::StrStack;

use super::Options;

pub(super) enum TextArgument<'a> {
    String(Cow<'a, str>),
    FromBuffer(usize),
}

impl<'a> From<&'a str> for TextArgument<'a> {
    fn from(s: &'a str) -> Self {
        TextArgument::String(Cow::from(s))
    }
}

impl<'a> From<String> for TextArgument<'a> {
    fn from(s: String) -> Self {
        TextArgument::String(Cow::from(s))
    }
}

impl<'a> From<usize> for TextArgument<'a> {
    fn from(i: usize) -> Self {
        TextArgument::FromBuffer(i)
    }
}

pub(super) struct TextItem<'a, I> {
    pub(super) color: &'a str,
    pub(super) size: usize,
    pub(super) x: f64,
    pub(super) y: f64,
    pub(super) text: TextArgument<'a>,
    pub(super) location: Option<&'a str>,
    pub(super) extra: I,
}

/// Pixel sizes shared by everything drawn on one image.
#[derive(Debug, Clone, Copy)]
pub(super) struct Dimensions {
    pub(super) image_width: usize,
    pub(super) image_height: usize,
}

pub(super) fn newline<W: Write>(svg: &mut Writer<W>) -> quick_xml::Result<()> {
    svg.write_event(Event::Text(BytesText::from_escaped("\n")))
}

pub(super) fn write_header<W>(svg: &mut Writer<W>, dims: Dimensions) -> quick_xml::Result<()>
where
    W: Write,
{
    let width = dims.image_width.to_string();
    let height = dims.image_height.to_string();
    let view_box = format!("0 0 {} {}", dims.image_width, dims.image_height);

    svg.write_event(Event::Decl(BytesDecl::new("1.0", None, Some("no"))))?;
    newline(svg)?;
    svg.write_event(Event::Start(BytesStart::new("svg").with_attributes(vec![
        ("version", "1.1"),
        ("width", width.as_str()),
        ("height", height.as_str()),
        ("viewBox", view_box.as_str()),
        ("xmlns", "http://www.w3.org/2000/svg"),
    ])))?;
    newline(svg)?;
    svg.write_event(Event::Comment(BytesText::new(
        " Flame graph stack visualization, written by flamepipe. ",
    )))?;
    newline(svg)
}

pub(super) fn write_prelude<W>(
    svg: &mut Writer<W>,
    dims: Dimensions,
    opt: &Options,
    (bgcolor1, bgcolor2): (&str, &str),
) -> quick_xml::Result<()>
where
    W: Write,
{
    svg.write_event(Event::Start(BytesStart::new("defs")))?;
    svg.write_event(Event::Start(BytesStart::new("linearGradient").with_attributes(vec![
        ("id", "background"),
        ("y1", "0"),
        ("y2", "1"),
        ("x1", "0"),
        ("x2", "0"),
    ])))?;
    svg.write_event(Event::Empty(
        BytesStart::new("stop").with_attributes(vec![("stop-color", bgcolor1), ("offset", "5%")]),
    ))?;
    svg.write_event(Event::Empty(
        BytesStart::new("stop").with_attributes(vec![("stop-color", bgcolor2), ("offset", "95%")]),
    ))?;
    svg.write_event(Event::End(BytesEnd::new("linearGradient")))?;
    svg.write_event(Event::End(BytesEnd::new("defs")))?;
    newline(svg)?;

    svg.write_event(Event::Start(
        BytesStart::new("style").with_attributes(iter::once(("type", "text/css"))),
    ))?;
    svg.write_event(Event::Text(BytesText::new(
        ".func_g:hover { stroke:black; stroke-width:0.5; cursor:pointer; }",
    )))?;
    svg.write_event(Event::End(BytesEnd::new("style")))?;
    newline(svg)?;

    let width = dims.image_width.to_string();
    let height = dims.image_height.to_string();
    svg.write_event(Event::Empty(BytesStart::new("rect").with_attributes(vec![
        ("x", "0"),
        ("y", "0"),
        ("width", width.as_str()),
        ("height", height.as_str()),
        ("fill", "url(#background)"),
    ])))?;
    newline(svg)?;

    // We don't care too much about allocating just for the prelude
    let mut buf = StrStack::new();
    write_str(
        svg,
        &mut buf,
        TextItem {
            color: "rgb(0,0,0)",
            size: opt.font_size + 5,
            x: (dims.image_width / 2) as f64,
            y: (opt.font_size * 2) as f64,
            text: opt.title.as_str().into(),
            location: Some("middle"),
            extra: iter::once(("id", "title")),
        },
    )?;

    if let Some(ref subtitle) = opt.subtitle {
        write_str(
            svg,
            &mut buf,
            TextItem {
                color: "rgb(160,160,160)",
                size: opt.font_size,
                x: (dims.image_width / 2) as f64,
                y: (opt.font_size * 4) as f64,
                text: subtitle.as_str().into(),
                location: Some("middle"),
                extra: iter::once(("id", "subtitle")),
            },
        )?;
    }

    if let Some(ref notes) = opt.notes {
        svg.write_event(Event::Start(
            BytesStart::new("desc").with_attributes(iter::once(("id", "notes"))),
        ))?;
        svg.write_event(Event::Text(BytesText::new(notes)))?;
        svg.write_event(Event::End(BytesEnd::new("desc")))?;
        newline(svg)?;
    }

    Ok(())
}

pub(super) fn write_str<'a, W, I>(
    svg: &mut Writer<W>,
    buf: &mut StrStack,
    item: TextItem<'a, I>,
) -> quick_xml::Result<()>
where
    W: Write,
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let x = write!(buf, "{:.2}", item.x);
    let y = write!(buf, "{:.2}", item.y);
    let fs = write!(buf, "{}", item.size);
    let mut text = BytesStart::new("text").with_attributes(item.extra);
    text.push_attribute(("text-anchor", item.location.unwrap_or("start")));
    text.push_attribute(("x", &buf[x]));
    text.push_attribute(("y", &buf[y]));
    text.push_attribute(("font-size", &buf[fs]));
    text.push_attribute(("font-family", "Verdana"));
    text.push_attribute(("fill", item.color));
    svg.write_event(Event::Start(text))?;
    let s = match item.text {
        TextArgument::String(ref s) => s.as_ref(),
        TextArgument::FromBuffer(i) => &buf[i],
    };
    svg.write_event(Event::Text(BytesText::new(s)))?;
    svg.write_event(Event::End(BytesEnd::new("text")))?;
    newline(svg)
}
