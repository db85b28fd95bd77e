use std::collections::VecDeque;
use std::io;

use super::{Collapse, CollapseError, CollapseParseError, Occurrences, Sample};

const UNKNOWN: &str = "[unknown]";

/// Settings that change how frames are named when collapsing `perf script` output.
#[derive(Clone, Debug, Default)]
pub struct Options {
    /// Include PID with process names [1]
    pub include_pid: bool,

    /// Include TID and PID with process names [1]
    pub include_tid: bool,

    /// Include raw addresses where symbols can't be found
    pub include_addrs: bool,

    /// Annotate kernel functions with a `_[k]`
    pub annotate_kernel: bool,

    /// Only consider samples of the given event type (e.g. `cycles:u`).
    ///
    /// If `None`, the first event type encountered is used and others are skipped.
    pub event_filter: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum EventFilterState {
    None,
    Defaulted,
    Warned,
}

/// A stack collapser for the output of `perf script`.
///
/// To construct one, either use `perf::Folder::default()` or create an [`Options`] and use
/// `perf::Folder::from(options)`.
#[derive(Debug, Clone)]
pub struct Folder {
    /// All lines until the next empty line are stack lines.
    in_event: bool,

    /// Skip all stack lines in this event.
    skip_stack: bool,

    /// Function entries on the stack in this entry thus far, outermost first.
    stack: VecDeque<String>,

    /// Current comm name, with pid/tid appended if requested.
    pname: String,

    /// Line number of the line being looked at, for error reporting.
    line_no: usize,

    /// The event type samples are kept for in this run, explicit or defaulted.
    event_filter: Option<String>,

    event_filtering: EventFilterState,

    opt: Options,
}

impl From<Options> for Folder {
    fn from(opt: Options) -> Self {
        Folder {
            in_event: false,
            skip_stack: false,
            stack: VecDeque::default(),
            pname: String::new(),
            line_no: 0,
            event_filter: opt.event_filter.clone(),
            event_filtering: EventFilterState::None,
            opt,
        }
    }
}

impl Default for Folder {
    fn default() -> Self {
        Options::default().into()
    }
}

impl Collapse for Folder {
    fn collapse<R, W>(&mut self, reader: R, writer: W) -> Result<usize, CollapseError>
    where
        R: io::BufRead,
        W: io::Write,
    {
        let mut occurrences = Occurrences::new();
        let nsamples = self.fold_into(reader, &mut occurrences)?;
        occurrences.write(writer)?;
        Ok(nsamples)
    }
}

impl Folder {
    /// Parses `perf script` output and records every sample in `occurrences`.
    ///
    /// Returns the number of samples recorded.
    pub fn fold_into<R>(
        &mut self,
        reader: R,
        occurrences: &mut Occurrences,
    ) -> Result<usize, CollapseError>
    where
        R: io::BufRead,
    {
        self.for_each_sample(reader, |sample| occurrences.insert_sample(sample))
    }

    /// Parses `perf script` output and hands each sample to `f` as soon as its stack is
    /// complete.
    ///
    /// Returns the number of samples produced.
    pub fn for_each_sample<R, F>(&mut self, mut reader: R, mut f: F) -> Result<usize, CollapseError>
    where
        R: io::BufRead,
        F: FnMut(&Sample),
    {
        let mut line = String::new();
        let mut nsamples = 0;
        self.reset();
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                break;
            }
            self.line_no += 1;

            if line.starts_with('#') {
                continue;
            }

            let line = line.trim_end();
            if line.is_empty() {
                if let Some(sample) = self.after_event() {
                    f(&sample);
                    nsamples += 1;
                }
            } else if self.in_event {
                self.on_stack_line(line);
            } else {
                self.on_event_line(line)?;
            }
        }

        // the file may not end with a blank line
        if let Some(sample) = self.after_event() {
            f(&sample);
            nsamples += 1;
        }

        debug!("collapsed {} perf samples", nsamples);
        Ok(nsamples)
    }

    fn reset(&mut self) {
        self.in_event = false;
        self.skip_stack = false;
        self.stack.clear();
        self.pname.clear();
        self.line_no = 0;
        self.event_filter = self.opt.event_filter.clone();
        self.event_filtering = EventFilterState::None;
    }

    fn malformed(&self, reason: &'static str, line: &str) -> CollapseParseError {
        CollapseParseError {
            line: self.line_no,
            reason,
            content: line.to_string(),
        }
    }

    fn event_line_parts(line: &str) -> Option<(&str, &str, &str)> {
        let mut word_start = 0;
        let mut all_digits = false;
        let mut contains_slash_at = None;
        for (idx, c) in line.char_indices() {
            if c == ' ' {
                if idx == word_start {
                    // runs of spaces, like the padding in `   42/42    `
                    word_start = idx + 1;
                    continue;
                }
                if all_digits && word_start > 0 {
                    // found an all-digit word
                    let (pid, tid) = if let Some(slash) = contains_slash_at {
                        // found PID + TID
                        (&line[word_start..slash], &line[(slash + 1)..idx])
                    } else {
                        // found TID
                        ("?", &line[word_start..idx])
                    };
                    let comm = line[..word_start].trim();
                    return Some((comm, pid, tid));
                }
                word_start = idx + 1;
                all_digits = true;
            } else if c == '/' {
                if all_digits {
                    contains_slash_at = Some(idx);
                }
            } else if c.is_ascii_digit() {
                // we're still all digits if we were all digits
            } else {
                all_digits = false;
                contains_slash_at = None;
            }
        }
        None
    }

    // we have an event line, like:
    //
    //     day1 25607 4794564.109216: cycles:
    //     day1 12688 [002] 6544038.708352: cpu-clock:
    //     day1 24636/25607 [000] 4794564.109216: cycles:
    //     day1   913    72.176760:     257597 cycles:u:
    //     day1    42/42    100.000001: cycles:u:
    fn on_event_line(&mut self, line: &str) -> Result<(), CollapseParseError> {
        if line.starts_with('\t') {
            return Err(self.malformed("stack line without a preceding event line", line));
        }

        let (comm, pid, tid) = match Self::event_line_parts(line) {
            Some(parts) => parts,
            None => return Err(self.malformed("event line without a pid", line)),
        };
        self.in_event = true;

        if let Some(event) = line.rsplit(' ').next() {
            if let Some(event) = event.strip_suffix(':') {
                if let Some(ref filter) = self.event_filter {
                    if event != filter {
                        if let EventFilterState::Defaulted = self.event_filtering {
                            // only print this warning if necessary:
                            // when we defaulted and there were
                            // multiple event types.
                            warn!("Filtering for events of type: {}", filter);
                            self.event_filtering = EventFilterState::Warned;
                        }
                        self.skip_stack = true;
                        return Ok(());
                    }
                } else {
                    // By default only show events of the first encountered
                    // event type. Merging together different types, such as
                    // instructions and cycles, produces misleading results.
                    self.event_filter = Some(event.to_string());
                    self.event_filtering = EventFilterState::Defaulted;
                }
            }
        }

        self.pname.clear();
        self.pname.push_str(&comm.replace(' ', "_"));
        if self.opt.include_tid {
            self.pname.push('-');
            self.pname.push_str(pid);
            self.pname.push('/');
            self.pname.push_str(tid);
        } else if self.opt.include_pid {
            self.pname.push('-');
            self.pname.push_str(pid);
        }
        Ok(())
    }

    fn stack_line_parts(line: &str) -> Option<(&str, &str, &str)> {
        let (pc, rest) = line.trim_start().split_once(' ')?;
        // module is always wrapped in (), and its path may contain spaces
        let rest = rest.strip_suffix(')')?;
        let (rawfunc, module) = match rest.rfind(" (") {
            Some(open) => (&rest[..open], &rest[(open + 2)..]),
            None => ("", rest.strip_prefix('(')?),
        };
        let rawfunc = match rawfunc.trim() {
            // Sometimes there are two spaces betwen the pc and the (, like:
            //     7f1e2215d058  (/lib/x86_64-linux-gnu/libc-2.15.so)
            "" => UNKNOWN,
            s => s,
        };
        Some((pc, rawfunc, module))
    }

    // we have a stack line that shows one stack entry from the preceeding event, like:
    //
    //     ffffffff8103ce3b native_safe_halt ([kernel.kallsyms])
    //     55d0c0a0b1c2 day1::fuel_for+0x12 (/home/aoc/target/release/day1)
    //     7f53389994d0 [unknown] ([unknown])
    //                0 [unknown] ([unknown])
    //     55d0c0a0b1c2 day1::main+0x10 (/home/me/My Projects/aoc/target/release/day1)
    fn on_stack_line(&mut self, line: &str) {
        if self.skip_stack {
            return;
        }

        let (pc, mut rawfunc, module) = match Self::stack_line_parts(line) {
            Some(parts) => parts,
            None => {
                warn!("skipping weird stack line {}: {:?}", self.line_no, line.trim());
                return;
            }
        };

        // Strip off symbol offsets
        if let Some(offset) = rawfunc.rfind("+0x") {
            let end = &rawfunc[(offset + 3)..];
            if end.chars().all(|c| char::is_ascii_hexdigit(&c)) {
                rawfunc = &rawfunc[..offset];
            }
        }

        let mut func = with_module_fallback(module, rawfunc, pc, self.opt.include_addrs);
        func = tidy_generic(func);

        // detect kernel from the module name; eg, frames to parse include:
        //
        //     ffffffff8103ce3b native_safe_halt ([kernel.kallsyms])
        //     8c3453 tcp_sendmsg (/lib/modules/4.3.0-rc1-virtual/build/vmlinux)
        if self.opt.annotate_kernel
            && (module.starts_with('[') || module.ends_with("vmlinux"))
            && module != UNKNOWN
        {
            func.push_str("_[k]");
        }

        self.stack.push_front(func);
    }

    fn after_event(&mut self) -> Option<Sample> {
        let was_in_event = std::mem::replace(&mut self.in_event, false);
        let skipped = std::mem::replace(&mut self.skip_stack, false);
        if !was_in_event || skipped {
            self.stack.clear();
            return None;
        }

        // an unwinder that gave up leaves unresolved frames at the outermost end
        let resolved = self.stack.iter().any(|f| !is_unresolved(f));
        if resolved {
            while self.stack.front().map_or(false, |f| is_unresolved(f)) {
                self.stack.pop_front();
            }
        }

        let frames = std::iter::once(self.pname.clone()).chain(self.stack.drain(..));
        Some(Sample::new(frames))
    }
}

// `[unknown]`, or `[unknown <addr>]` when addresses are included
fn is_unresolved(frame: &str) -> bool {
    frame == UNKNOWN || frame.starts_with("[unknown <")
}

// massage function name to be nicer
fn with_module_fallback(module: &str, rawfunc: &str, pc: &str, include_addrs: bool) -> String {
    if rawfunc != UNKNOWN {
        return rawfunc.to_string();
    }

    // try to use part of module name as function if unknown
    let rawfunc = match (module, include_addrs) {
        (UNKNOWN, true) => "unknown",
        (UNKNOWN, false) => {
            // no need to process this further
            return rawfunc.to_string();
        }
        (module, _) => {
            // use everything following last / of module as function name
            &module[module.rfind('/').map(|i| i + 1).unwrap_or(0)..]
        }
    };

    // output string is a bit longer than rawfunc but not much
    let mut res = String::with_capacity(rawfunc.len() + 12);

    res.push('[');
    res.push_str(rawfunc);
    if include_addrs {
        res.push_str(" <");
        res.push_str(pc);
        res.push('>');
    }
    res.push(']');

    res
}

fn tidy_generic(mut func: String) -> String {
    if func.contains(';') {
        func = func.replace(';', ":");
    }

    // remove argument list from function name, but _don't_ remove:
    //
    //  - Go method names like "net/http.(*Client).Do".
    //  - C++ anonymous namespace annotations.
    //  - our own "[module]" fallback names.
    if func.starts_with('[') {
        return func;
    }
    if let Some(first_paren) = func.find('(') {
        let is_anon_ns = func[first_paren..].starts_with("(anonymous namespace)");
        let is_go = first_paren > 0 && func[..first_paren].ends_with('.');
        if !is_anon_ns && !is_go && first_paren > 0 {
            func.truncate(first_paren);
        }
    }

    func
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const TWO_EVENTS: &str = "\
day1 4242 100.000001:     250000 cycles:u:
\t    55d0c0a0b1c2 day1::fuel_for+0x12 (/aoc/target/release/day1)
\t    55d0c0a0b000 day1::main+0x40 (/aoc/target/release/day1)
\t    7f0000001000 __libc_start_main+0xea (/usr/lib/libc.so.6)

day1 4242 100.000002:     250000 cycles:u:
\t    55d0c0a0b000 day1::main+0x40 (/aoc/target/release/day1)
\t    7f0000001000 __libc_start_main+0xea (/usr/lib/libc.so.6)
";

    fn fold(input: &str, opt: Options) -> Result<String, CollapseError> {
        let mut out = Vec::new();
        Folder::from(opt).collapse(input.as_bytes(), &mut out)?;
        Ok(String::from_utf8(out).unwrap())
    }

    #[test]
    fn stack_lines_are_reversed_and_offsets_stripped() {
        assert_eq!(
            fold(TWO_EVENTS, Options::default()).unwrap(),
            "day1;__libc_start_main;day1::main 1\n\
             day1;__libc_start_main;day1::main;day1::fuel_for 1\n"
        );
    }

    #[test]
    fn pid_and_tid_are_appended_on_request() {
        let input = "day1 10/11 1.0: cycles:\n\t1 f (/bin/day1)\n";
        let pid = Options {
            include_pid: true,
            ..Default::default()
        };
        let tid = Options {
            include_tid: true,
            ..Default::default()
        };
        assert_eq!(fold(input, pid).unwrap(), "day1-10;f 1\n");
        assert_eq!(fold(input, tid).unwrap(), "day1-10/11;f 1\n");
    }

    #[test]
    fn padded_pid_columns_are_understood() {
        let input = "my prog    42/43    100.000001: cycles:u:\n\t1 f (/bin/prog)\n";
        let tid = Options {
            include_tid: true,
            ..Default::default()
        };
        assert_eq!(fold(input, tid).unwrap(), "my_prog-42/43;f 1\n");
    }

    #[test]
    fn unknown_symbols_fall_back_to_module() {
        let input = "\
day1 1 1.0: cycles:
\t7f00 [unknown] (/usr/lib/libm.so.6)
\t7f01 main (/bin/day1)
";
        assert_eq!(fold(input, Options::default()).unwrap(), "day1;main;[libm.so.6] 1\n");
        let addrs = Options {
            include_addrs: true,
            ..Default::default()
        };
        assert_eq!(fold(input, addrs).unwrap(), "day1;main;[libm.so.6 <7f00>] 1\n");
    }

    #[test]
    fn incomplete_unwinds_are_truncated() {
        let input = "\
day1 1 1.0: cycles:
\t55d0 day1::solve (/bin/day1)
\t55d1 day1::parse (/bin/day1)
\t0 [unknown] ([unknown])
\t0 [unknown] ([unknown])
";
        assert_eq!(
            fold(input, Options::default()).unwrap(),
            "day1;day1::parse;day1::solve 1\n"
        );
    }

    #[test]
    fn first_event_type_wins_by_default() {
        let input = "\
day1 1 1.0: cycles:
\t1 a (/bin/day1)

day1 1 2.0: instructions:
\t1 b (/bin/day1)

day1 1 3.0: cycles:
\t1 c (/bin/day1)
";
        assert_eq!(fold(input, Options::default()).unwrap(), "day1;a 1\nday1;c 1\n");

        let only_instructions = Options {
            event_filter: Some("instructions".to_string()),
            ..Default::default()
        };
        assert_eq!(fold(input, only_instructions).unwrap(), "day1;b 1\n");
    }

    #[test]
    fn tidies_symbol_names() {
        assert_eq!(tidy_generic("foo(int, char)".into()), "foo");
        assert_eq!(tidy_generic("net/http.(*Client).Do".into()), "net/http.(*Client).Do");
        assert_eq!(
            tidy_generic("(anonymous namespace)::thing".into()),
            "(anonymous namespace)::thing"
        );
        assert_eq!(tidy_generic("a;b".into()), "a:b");
        assert_eq!(tidy_generic("[libc.so.6]".into()), "[libc.so.6]");
    }

    #[test]
    fn kernel_frames_are_annotated() {
        let input = "\
day1 1 1.0: cycles:
\tffffffff8103ce3b native_safe_halt ([kernel.kallsyms])
\t55d0 main (/bin/day1)
";
        let opt = Options {
            annotate_kernel: true,
            ..Default::default()
        };
        assert_eq!(fold(input, opt).unwrap(), "day1;main;native_safe_halt_[k] 1\n");
    }

    #[test]
    fn stack_without_event_is_malformed() {
        let err = fold("\t55d0 main (/bin/day1)\n", Options::default()).unwrap_err();
        match err {
            CollapseError::Parse(e) => {
                assert_eq!(e.line, 1);
                assert_eq!(e.content, "\t55d0 main (/bin/day1)");
            }
            e => panic!("unexpected error: {}", e),
        }
    }

    #[test]
    fn stack_line_without_module_is_skipped() {
        testing_logger::setup();
        let input = "day1 1 1.0: cycles:\n\t55d0 main\n\t55d1 _start (/bin/day1)\n";
        assert_eq!(fold(input, Options::default()).unwrap(), "day1;_start 1\n");
        testing_logger::validate(|captured_logs| {
            let warnings: Vec<_> = captured_logs
                .iter()
                .filter(|log| log.level == log::Level::Warn)
                .collect();
            assert_eq!(warnings.len(), 1);
            assert!(warnings[0].body.contains("stack line 2"), "{}", warnings[0].body);
        });
    }

    #[test]
    fn module_paths_may_contain_spaces() {
        let input = "\
day9 1 1.0: cycles:
\t55d0 day9::main+0x10 (/home/me/My Projects/aoc/target/release/day9)
\t7f00 [unknown] (/home/me/My Projects/lib/libaoc.so)
\t7f01  (/usr/lib/libc.so.6)
";
        assert_eq!(
            fold(input, Options::default()).unwrap(),
            "day9;[libc.so.6];[libaoc.so];day9::main 1\n"
        );
    }

    #[test]
    fn default_event_filter_does_not_outlive_a_run() {
        let cycles = "day1 1 1.0: cycles:\n\t1 a (/bin/day1)\n";
        let instructions = "day1 1 1.0: instructions:\n\t1 b (/bin/day1)\n";
        let mut folder = Folder::default();

        let mut out = Vec::new();
        assert_eq!(folder.collapse(cycles.as_bytes(), &mut out).unwrap(), 1);
        let mut out = Vec::new();
        assert_eq!(folder.collapse(instructions.as_bytes(), &mut out).unwrap(), 1);
        assert_eq!(String::from_utf8(out).unwrap(), "day1;b 1\n");

        let mut explicit = Folder::from(Options {
            event_filter: Some("cycles".to_string()),
            ..Default::default()
        });
        let mut out = Vec::new();
        explicit.collapse(cycles.as_bytes(), &mut out).unwrap();
        assert_eq!(explicit.collapse(instructions.as_bytes(), &mut out).unwrap(), 0);
    }

    #[test]
    fn samples_are_streamed_in_input_order() {
        let mut seen = Vec::new();
        let n = Folder::default()
            .for_each_sample(TWO_EVENTS.as_bytes(), |s| seen.push(s.frames().len()))
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(seen, vec![4, 3]);
    }
}
