/// Reading the folded stack format back into `(stack, count)` pairs.
pub mod folded;

/// Stack collapsing for the output of [`perf script`](https://linux.die.net/man/1/perf-script).
///
/// See the [crate-level documentation] for details.
///
///   [crate-level documentation]: ../../index.html
pub mod perf;

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use ahash::AHashMap;

const CAPACITY_HASHMAP: usize = 512;
pub(crate) const CAPACITY_READER: usize = 128 * 1024;

/// The delimiter placed between frames of a collapsed call path.
pub const FRAME_DELIMITER: char = ';';

/// The abstract behavior of stack collapsing.
///
/// Implementors of this trait are providing a way to take the stack traces produced by a
/// particular profiler's output (like `perf script`) and produce lines in the folded stack format
/// expected by [`crate::flamegraph::from_lines`].
pub trait Collapse {
    /// Collapses the contents of the provided `reader` and writes folded stack lines to the
    /// provided `writer`.
    ///
    /// Returns the number of samples that were collapsed.
    fn collapse<R, W>(&mut self, reader: R, writer: W) -> Result<usize, CollapseError>
    where
        R: io::BufRead,
        W: io::Write;

    /// Collapses the contents of a file (or of STDIN if `infile` is `None`) and writes folded
    /// stack lines to provided `writer`.
    fn collapse_file<P, W>(&mut self, infile: Option<P>, writer: W) -> Result<usize, CollapseError>
    where
        P: AsRef<Path>,
        W: Write,
    {
        match infile {
            Some(ref path) => {
                let file = File::open(path).map_err(|source| CollapseError::Open {
                    path: path.as_ref().to_path_buf(),
                    source,
                })?;
                let reader = io::BufReader::with_capacity(CAPACITY_READER, file);
                self.collapse(reader, writer)
            }
            None => {
                let stdio = io::stdin();
                let stdio_guard = stdio.lock();
                let reader = io::BufReader::with_capacity(CAPACITY_READER, stdio_guard);
                self.collapse(reader, writer)
            }
        }
    }
}

/// Failure while collapsing raw samples.
#[derive(Debug, thiserror::Error)]
pub enum CollapseError {
    /// The raw sample input broke the format the collapser expects.
    #[error(transparent)]
    Parse(#[from] CollapseParseError),

    /// The raw sample file could not be opened.
    #[error("could not open raw samples at {}: {source}", path.display())]
    Open {
        /// The file we tried to open.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// Reading samples or writing folded lines failed.
    #[error("i/o error while collapsing: {0}")]
    Io(#[from] io::Error),
}

/// A line of raw sample input that the collapser could not make sense of.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed sample input at line {line}: {reason}: {content:?}")]
pub struct CollapseParseError {
    /// 1-based line number in the raw input.
    pub line: usize,
    /// What was wrong with it.
    pub reason: &'static str,
    /// The offending line, without its trailing newline.
    pub content: String,
}

/// One captured call stack, outermost frame first and leaf frame last.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Sample {
    frames: Vec<String>,
}

impl Sample {
    /// Creates a sample from frames ordered outermost first.
    pub fn new<I, S>(frames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Sample {
            frames: frames.into_iter().map(Into::into).collect(),
        }
    }

    /// The frames of this sample, outermost first.
    pub fn frames(&self) -> &[String] {
        &self.frames
    }

    /// Whether this sample holds no frames at all.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Number of times each distinct call path was seen.
///
/// Keys are call paths joined with [`FRAME_DELIMITER`]; every stored count is positive.
#[derive(Debug, Clone, Default)]
pub struct Occurrences {
    map: AHashMap<String, usize>,
    key: String,
}

impl Occurrences {
    /// Creates an empty map.
    pub fn new() -> Self {
        Occurrences {
            map: AHashMap::with_capacity(CAPACITY_HASHMAP),
            key: String::new(),
        }
    }

    /// Collapses every sample produced by `samples`.
    pub fn from_samples<'a, I>(samples: I) -> Self
    where
        I: IntoIterator<Item = &'a Sample>,
    {
        let mut occurrences = Self::new();
        for sample in samples {
            occurrences.insert_sample(sample);
        }
        occurrences
    }

    /// Adds `count` to the call path `key`. Zero counts are ignored.
    pub fn add(&mut self, key: &str, count: usize) {
        if count == 0 {
            return;
        }
        // only allocate the key the first time we see a stack
        if let Some(v) = self.map.get_mut(key) {
            *v = v.saturating_add(count);
        } else {
            self.map.insert(key.to_string(), count);
        }
    }

    /// Records a single sample. Empty samples carry no call path and are skipped.
    pub fn insert_sample(&mut self, sample: &Sample) {
        self.insert_frames(sample.frames().iter().map(String::as_str));
    }

    /// Records a single sample given as frames, outermost first.
    pub fn insert_frames<'a, I>(&mut self, frames: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut key = std::mem::take(&mut self.key);
        key.clear();
        for (i, frame) in frames.into_iter().enumerate() {
            if i != 0 {
                key.push(FRAME_DELIMITER);
            }
            key.push_str(frame);
        }
        if !key.is_empty() {
            self.add(&key, 1);
        }
        self.key = key;
    }

    /// Folds all of `other`'s counts into this map.
    pub fn merge(&mut self, other: &Occurrences) {
        for (key, &count) in other.map.iter() {
            self.add(key, count);
        }
    }

    /// The count recorded for `key`, if any.
    pub fn get(&self, key: &str) -> Option<usize> {
        self.map.get(key).copied()
    }

    /// Number of distinct call paths.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether no call path has been recorded.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Sum of all counts.
    pub fn total(&self) -> usize {
        self.map.values().fold(0, |sum, &n| sum.saturating_add(n))
    }

    /// All `(call path, count)` pairs sorted by call path.
    pub fn iter_sorted(&self) -> Vec<(&str, usize)> {
        let mut contents: Vec<_> = self.map.iter().map(|(k, &v)| (k.as_str(), v)).collect();
        contents.sort_unstable();
        contents
    }

    /// Writes the folded lines (`stack count\n`) sorted by call path.
    pub fn write<W>(&self, mut writer: W) -> io::Result<()>
    where
        W: io::Write,
    {
        let mut count = itoa::Buffer::new();
        for (key, value) in self.iter_sorted() {
            writer.write_all(key.as_bytes())?;
            writer.write_all(b" ")?;
            writer.write_all(count.format(value).as_bytes())?;
            writer.write_all(b"\n")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use maplit::hashmap;
    use rand::rngs::SmallRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;
    use std::collections::HashMap;

    fn samples(stacks: &[&str]) -> Vec<Sample> {
        stacks.iter().map(|s| Sample::new(s.split(';'))).collect()
    }

    fn as_map(occurrences: &Occurrences) -> HashMap<String, usize> {
        occurrences
            .iter_sorted()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    #[test]
    fn collapses_repeated_paths() {
        let occurrences = Occurrences::from_samples(&samples(&["a;b", "a;b", "a;c"]));
        assert_eq!(
            as_map(&occurrences),
            hashmap! {
                "a;b".to_string() => 2,
                "a;c".to_string() => 1,
            }
        );
    }

    #[test]
    fn total_matches_number_of_samples() {
        let input = samples(&["main;parse", "main;parse;lex", "main", "main;parse", "main;eval"]);
        let occurrences = Occurrences::from_samples(&input);
        assert_eq!(occurrences.total(), input.len());
        assert_eq!(occurrences.len(), 4);
    }

    #[test]
    fn order_does_not_matter() {
        let mut input = samples(&[
            "main;solve;fuel",
            "main;solve;fuel",
            "main;parse",
            "main;solve",
            "main;parse;read",
            "main;solve;fuel;div",
        ]);
        let expected = Occurrences::from_samples(&input);
        let mut rng = SmallRng::seed_from_u64(0x5eed);
        for _ in 0..16 {
            input.shuffle(&mut rng);
            assert_eq!(as_map(&Occurrences::from_samples(&input)), as_map(&expected));
        }
    }

    #[test]
    fn merging_twice_doubles_counts() {
        let input = samples(&["a;b", "a;b", "a;c", "d"]);
        let once = Occurrences::from_samples(&input);
        let mut twice = Occurrences::from_samples(&input);
        twice.merge(&once);
        assert_eq!(twice.len(), once.len());
        for (key, count) in once.iter_sorted() {
            assert_eq!(twice.get(key), Some(count * 2));
        }
    }

    #[test]
    fn empty_samples_are_skipped() {
        let mut occurrences = Occurrences::new();
        occurrences.insert_sample(&Sample::default());
        occurrences.add("a", 0);
        assert!(occurrences.is_empty());
    }

    #[test]
    fn writes_sorted_folded_lines() {
        let occurrences = Occurrences::from_samples(&samples(&["b;c", "a", "b;c", "a;z"]));
        let mut out = Vec::new();
        occurrences.write(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "a 1\na;z 1\nb;c 2\n");
    }
}
