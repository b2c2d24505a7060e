//! Test output scanning.

use crate::core::text::truncate_chars;

const FAILURE_MARKERS: [&str; 2] = ["FAILED", "ERROR"];
const MESSAGE_LIMIT: usize = 200;
const RAW_EXCERPT_LIMIT: usize = 500;
/// Upper bound for the error entry recorded after a failed test run.
pub const ERROR_ENTRY_LIMIT: usize = 2000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestFailure {
    pub name: String,
    pub message: String,
}

/// Collect failures from raw test output.
///
/// A line containing a marker opens a failure; the consecutive non-blank lines
/// after it form its message.
pub fn extract_failures(output: &str) -> Vec<TestFailure> {
    let lines: Vec<&str> = output.lines().collect();
    let mut failures = Vec::new();
    let mut idx = 0;
    while idx < lines.len() {
        let line = lines[idx];
        idx += 1;
        if !FAILURE_MARKERS.iter().any(|marker| line.contains(marker)) {
            continue;
        }
        let name = match line.rsplit_once("::") {
            Some((_, tail)) => tail.trim(),
            None => line.trim(),
        };
        let mut message = Vec::new();
        while idx < lines.len() && !lines[idx].trim().is_empty() {
            if FAILURE_MARKERS.iter().any(|marker| lines[idx].contains(marker)) {
                break;
            }
            message.push(lines[idx].trim());
            idx += 1;
        }
        failures.push(TestFailure {
            name: name.to_string(),
            message: message.join("\n"),
        });
    }
    failures
}

/// Human summary of a failed test run.
pub fn summarize_failures(output: &str) -> String {
    let failures = extract_failures(output);
    if failures.is_empty() {
        return truncate_chars(output.trim(), RAW_EXCERPT_LIMIT).to_string();
    }
    let mut summary = format!("Found {} test failure(s):", failures.len());
    for failure in &failures {
        summary.push_str("\n- ");
        summary.push_str(&failure.name);
        if !failure.message.is_empty() {
            summary.push_str(": ");
            summary.push_str(truncate_chars(&failure.message, MESSAGE_LIMIT));
        }
    }
    summary
}

/// Error entry appended to the workflow state after a failed test run.
pub fn test_error_entry(output: &str) -> String {
    let entry = format!("Tests failed: {}", summarize_failures(output));
    truncate_chars(&entry, ERROR_ENTRY_LIMIT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PYTEST_OUTPUT: &str = "\
============ FAILURES ============
FAILED tests/test_api.py::test_health
assert 404 == 200
 where 404 = response.status

ERROR tests/test_db.py::test_connect
ConnectionRefusedError
";

    #[test]
    fn markers_open_failures_with_following_lines() {
        let failures = extract_failures(PYTEST_OUTPUT);
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].name, "test_health");
        assert_eq!(
            failures[0].message,
            "assert 404 == 200\nwhere 404 = response.status"
        );
        assert_eq!(failures[1].name, "test_connect");
        assert_eq!(failures[1].message, "ConnectionRefusedError");
    }

    #[test]
    fn summary_counts_failures() {
        let summary = summarize_failures(PYTEST_OUTPUT);
        assert!(summary.starts_with("Found 2 test failure(s):"));
        assert!(summary.contains("- test_connect: ConnectionRefusedError"));
    }

    #[test]
    fn summary_without_markers_uses_raw_excerpt() {
        let output = "x".repeat(900);
        assert_eq!(summarize_failures(&output).len(), 500);
    }

    #[test]
    fn error_entry_is_bounded() {
        let mut output = String::new();
        for n in 0..200 {
            output.push_str(&format!("FAILED t.py::case_{n}\n{}\n\n", "y".repeat(300)));
        }
        let entry = test_error_entry(&output);
        assert!(entry.starts_with("Tests failed: Found 200"));
        assert_eq!(entry.chars().count(), ERROR_ENTRY_LIMIT);
    }
}
