mod common;

use std::fs::File;
use std::io::{self, BufReader, Cursor, Write};
use std::path::Path;
use std::process::{Command, Stdio};

use assert_cmd::cargo::CommandCargoExt;
use flamepipe::collapse::perf::{Folder, Options};
use flamepipe::collapse::CollapseError;
use log::Level;
use pretty_assertions::assert_eq;

const DATA_DIR: &str = "./tests/data/collapse-perf";
const RESULTS_DIR: &str = "./tests/data/collapse-perf/results";

fn options_from_vec(opt_vec: Vec<&str>) -> Options {
    let mut options = Options::default();
    for option in opt_vec {
        match option {
            "pid" => options.include_pid = true,
            "tid" => options.include_tid = true,
            "addrs" => options.include_addrs = true,
            "kernel" => options.annotate_kernel = true,
            "instructions" => options.event_filter = Some("instructions".to_string()),
            opt => panic!("invalid option: {}", opt),
        }
    }
    options
}

// Create tests for test files in tests/data/collapse-perf. The test files are used as input
// and the results are compared to result files in the results sub directory.
// The test and result file names are derived from $name.
// The part after the double underscore are underscore separated options.
// For example, collapse_perf_day9__pid will use the following:
//     test file: day9.txt
//     result file: day9-collapsed-pid.txt
//     flag: pid
macro_rules! collapse_perf_tests {
    ($($name:ident => $nsamples:expr),*) => {
    $(
        #[test]
        #[allow(non_snake_case)]
        fn $name() {
            let test_name = stringify!($name).trim_start_matches("collapse_perf_");
            let mut split_name = test_name.split("__");
            let test_file_stem = split_name.next().unwrap().replace('_', "-");
            let options: Vec<_> = split_name
                .next()
                .map(|s| s.split('_').collect())
                .unwrap_or_default();

            let test_file = format!("{}.txt", test_file_stem);
            let result_file = format!(
                "{}-collapsed{}.txt",
                test_file_stem,
                if options.is_empty() {
                    "".to_string()
                } else {
                    format!("-{}", options.join("+"))
                }
            );

            let nsamples = common::test_collapse(
                Folder::from(options_from_vec(options)),
                Path::new(DATA_DIR).join(test_file).to_str().unwrap(),
                Path::new(RESULTS_DIR).join(result_file).to_str().unwrap(),
            ).unwrap();
            assert_eq!(nsamples, $nsamples);
        }
    )*
    }
}

collapse_perf_tests! {
    collapse_perf_day9 => 7,
    collapse_perf_day9__pid => 7,
    collapse_perf_day9__tid => 7,
    collapse_perf_day9__kernel => 7,
    collapse_perf_day9__addrs => 7,
    collapse_perf_day9__instructions => 1
}

#[test]
fn collapse_perf_should_warn_when_filtering_events() {
    common::test_collapse_logs(
        Folder::default(),
        "./tests/data/collapse-perf/day9.txt",
        |captured_logs| {
            let nwarnings = captured_logs
                .iter()
                .filter(|log| {
                    log.body == "Filtering for events of type: cycles" && log.level == Level::Warn
                })
                .count();
            assert_eq!(
                nwarnings, 1,
                "filter warning logged {} times, but should be logged exactly once",
                nwarnings
            );
        },
    );
}

#[test]
fn collapse_perf_explicit_filter_does_not_warn() {
    common::test_collapse_logs(
        Folder::from(options_from_vec(vec!["instructions"])),
        "./tests/data/collapse-perf/day9.txt",
        |captured_logs| {
            assert!(captured_logs.iter().all(|log| log.level != Level::Warn));
        },
    );
}

#[test]
fn collapse_perf_reports_line_of_malformed_input() {
    let input = "day9 1/1 1.0: cycles:\n\t1 f (/bin/day9)\n\nnot an event line\n";
    match common::test_collapse_error(Folder::default(), input) {
        CollapseError::Parse(e) => {
            assert_eq!(e.line, 4);
            assert_eq!(e.content, "not an event line");
        }
        other => panic!("expected a parse error, got {:?}", other),
    }
}

#[test]
fn collapse_perf_cli() {
    let input_file = "./tests/data/collapse-perf/day9.txt";
    let expected_file = "./tests/data/collapse-perf/results/day9-collapsed-kernel.txt";

    // Test with file passed in
    let output = Command::cargo_bin("flamepipe-collapse")
        .unwrap()
        .arg("--kernel")
        .arg(input_file)
        .output()
        .expect("failed to execute process");
    assert!(output.status.success());
    let expected = BufReader::new(File::open(expected_file).unwrap());
    common::compare_results(Cursor::new(output.stdout), expected, expected_file);

    // Test with STDIN
    let mut child = Command::cargo_bin("flamepipe-collapse")
        .unwrap()
        .arg("--kernel")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .expect("Failed to spawn child process");
    let mut input = BufReader::new(File::open(input_file).unwrap());
    let stdin = child.stdin.as_mut().expect("Failed to open stdin");
    io::copy(&mut input, stdin).unwrap();
    let output = child.wait_with_output().expect("Failed to read stdout");
    let expected = BufReader::new(File::open(expected_file).unwrap());
    common::compare_results(Cursor::new(output.stdout), expected, expected_file);
}

#[test]
fn collapse_perf_cli_exits_5_on_malformed_input() {
    let mut child = Command::cargo_bin("flamepipe-collapse")
        .unwrap()
        .arg("-q")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("Failed to spawn child process");
    child
        .stdin
        .take()
        .expect("Failed to open stdin")
        .write_all(b"\t55d0c0a0b1c2 day9::main (/aoc/day9)\n")
        .unwrap();
    let output = child.wait_with_output().expect("Failed to read stdout");
    assert_eq!(output.status.code(), Some(5));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("line 1"), "{}", stderr);
}
