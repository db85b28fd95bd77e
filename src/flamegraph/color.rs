use std::fmt;
use std::str::FromStr;

use rgb::RGB8;

const YELLOW_GRADIENT: (&str, &str) = ("#eeeeee", "#eeeeb0");
const BLUE_GRADIENT: (&str, &str) = ("#eeeeee", "#e0e0ff");
const GRAY_GRADIENT: (&str, &str) = ("#f8f8f8", "#e8e8e8");

/// The color scheme frames are painted with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Palette {
    /// Reds and oranges (the classic CPU flame graph look).
    #[default]
    Hot,
    /// Greens and blues.
    Mem,
    /// Blues and purples.
    Io,
    /// Shades of red.
    Red,
    /// Shades of green.
    Green,
    /// Shades of blue.
    Blue,
    /// Shades of aqua.
    Aqua,
    /// Shades of yellow.
    Yellow,
    /// Shades of purple.
    Purple,
    /// Shades of orange.
    Orange,
}

impl FromStr for Palette {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hot" => Ok(Palette::Hot),
            "mem" => Ok(Palette::Mem),
            "io" => Ok(Palette::Io),
            "red" => Ok(Palette::Red),
            "green" => Ok(Palette::Green),
            "blue" => Ok(Palette::Blue),
            "aqua" => Ok(Palette::Aqua),
            "yellow" => Ok(Palette::Yellow),
            "purple" => Ok(Palette::Purple),
            "orange" => Ok(Palette::Orange),
            unknown => Err(format!("unknown color palette: {}", unknown)),
        }
    }
}

/// A frame fill, printed as `rgb(r,g,b)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Color(pub RGB8);

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rgb({},{},{})", self.0.r, self.0.g, self.0.b)
    }
}

/// Generate a vector hash for the name string, weighting early over
/// later characters. We want to pick the same colors for function
/// names across different flame graphs.
fn namehash<I: Iterator<Item = u8>>(name: I) -> f32 {
    let mut vector = 0.0;
    let mut weight = 1.0;
    let mut max = 1.0;
    let mut modulo = 10;

    // only the first three characters contribute
    for character in name.take(3) {
        let i = f32::from(character % modulo);
        vector += (i / f32::from(modulo - 1)) * weight;
        modulo += 1;
        max += weight;
        weight *= 0.70;
    }

    1.0 - vector / max
}

// module prefixes like `libc.so.6`module`func` shouldn't decide the color
fn strip_module(name: &str) -> &str {
    let rest = name.strip_prefix('`').unwrap_or(name);
    match rest.find('`') {
        Some(index) => &rest[index + 1..],
        None => name,
    }
}

macro_rules! t {
    ($b:expr, $a:expr, $x:expr) => {
        $b + ($a as f32 * $x) as u8
    };
}

/// The color of the frame called `name`.
///
/// This depends on nothing but `palette` and `name`, so a function is painted the same way
/// everywhere in a graph and across graphs.
pub fn color_for(palette: Palette, name: &str) -> Color {
    let name = strip_module(name);
    let v1 = namehash(name.bytes());
    let v2 = namehash(name.bytes().rev());
    let v3 = v2;

    let (r, g, b) = match palette {
        Palette::Hot => (t!(205, 50, v3), t!(0, 230, v1), t!(0, 55, v2)),
        Palette::Mem => (t!(0, 0, v3), t!(190, 50, v2), t!(0, 210, v1)),
        Palette::Io => (t!(80, 60, v1), t!(80, 60, v1), t!(190, 55, v2)),
        Palette::Red => (t!(200, 55, v1), t!(50, 80, v1), t!(50, 80, v1)),
        Palette::Green => (t!(50, 60, v1), t!(200, 55, v1), t!(50, 60, v1)),
        Palette::Blue => (t!(80, 60, v1), t!(80, 60, v1), t!(205, 50, v1)),
        Palette::Yellow => (t!(175, 55, v1), t!(175, 55, v1), t!(50, 20, v1)),
        Palette::Purple => (t!(190, 65, v1), t!(80, 60, v1), t!(190, 65, v1)),
        Palette::Aqua => (t!(50, 60, v1), t!(165, 55, v1), t!(165, 55, v1)),
        Palette::Orange => (t!(190, 65, v1), t!(90, 65, v1), t!(0, 0, v1)),
    };

    Color(RGB8::new(r, g, b))
}

/// The two stops of the background gradient for `palette`.
pub(super) fn bgcolors_for(palette: Palette) -> (&'static str, &'static str) {
    match palette {
        Palette::Hot => YELLOW_GRADIENT,
        Palette::Mem => BLUE_GRADIENT,
        _ => GRAY_GRADIENT,
    }
}
