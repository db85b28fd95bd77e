/// Splits a folded stack line into its call path and sample count.
///
/// The count is the last space-separated word on the line. A fractional part is truncated, so
/// `foo;bar 3.75` reads as three samples of `foo;bar`. Returns `None` for blank lines, lines
/// without a parseable count, and lines whose call path is empty.
pub fn parse_line(line: &str) -> Option<(&str, usize)> {
    let line = line.trim();
    let samplesi = line.rfind(' ')?;
    let mut samples = &line[(samplesi + 1)..];
    if let Some(doti) = samples.find('.') {
        samples = &samples[..doti];
    }
    let nsamples = samples.parse::<usize>().ok()?;
    let stack = line[..samplesi].trim_end();
    if stack.is_empty() {
        return None;
    }
    Some((stack, nsamples))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stack_and_count() {
        assert_eq!(parse_line("main;solve;fuel 42"), Some(("main;solve;fuel", 42)));
        assert_eq!(parse_line("  main;with space 7  "), Some(("main;with space", 7)));
    }

    #[test]
    fn truncates_fractional_counts() {
        assert_eq!(parse_line("a;b 3.75"), Some(("a;b", 3)));
    }

    #[test]
    fn rejects_malformed_lines() {
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line("a;b"), None);
        assert_eq!(parse_line("a;b x"), None);
        assert_eq!(parse_line(" 12"), None);
    }
}
