#![allow(dead_code)]

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Cursor};

use flamepipe::collapse::{Collapse, CollapseError};
use pretty_assertions::assert_eq;
use testing_logger::CapturedLog;

pub fn compare_results<R, E>(result: R, mut expected: E, expected_file: &str)
where
    R: BufRead,
    E: BufRead,
{
    let mut buf = String::new();
    let mut line_num = 1;
    for line in result.lines() {
        let line = line.unwrap();
        if expected.read_line(&mut buf).unwrap() == 0 {
            panic!(
                "\noutput has more lines than expected result file: {}",
                expected_file
            );
        }
        assert_eq!(line, buf.trim_end(), "\n{}:{}", expected_file, line_num);
        buf.clear();
        line_num += 1;
    }

    if expected.read_line(&mut buf).unwrap() > 0 {
        panic!(
            "\n{} has more lines than output, beginning at line: {}",
            expected_file, line_num
        )
    }
}

pub fn test_collapse<C>(
    mut collapser: C,
    test_filename: &str,
    expected_filename: &str,
) -> Result<usize, CollapseError>
where
    C: Collapse,
{
    let expected_len = fs::metadata(expected_filename)
        .unwrap_or_else(|e| panic!("result file {} not found: {}", expected_filename, e))
        .len() as usize;
    let mut result = Cursor::new(Vec::with_capacity(expected_len));
    let nsamples = collapser.collapse_file(Some(test_filename), &mut result)?;

    // write out the result to /tmp for easy restoration
    let tm = std::env::temp_dir().join(format!("flamepipe-test-{}.folded", rand::random::<u64>()));
    if fs::write(&tm, result.get_ref()).is_ok() {
        eprintln!("test output in {}", tm.display());
    }

    result.set_position(0);
    let expected = BufReader::new(File::open(expected_filename)?);
    compare_results(result, expected, expected_filename);
    Ok(nsamples)
}

pub fn test_collapse_logs<C, F>(mut collapser: C, input_file: &str, asserter: F)
where
    C: Collapse,
    F: Fn(&Vec<CapturedLog>),
{
    testing_logger::setup();
    let r = BufReader::new(File::open(input_file).unwrap());
    collapser.collapse(r, io::sink()).unwrap();
    testing_logger::validate(asserter);
}

pub fn test_collapse_error<C>(mut collapser: C, input: &str) -> CollapseError
where
    C: Collapse,
{
    collapser
        .collapse(input.as_bytes(), io::sink())
        .expect_err("expected an error")
}
