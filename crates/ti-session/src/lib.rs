#![forbid(unsafe_code)]

//! Cross-call session state plus the two interactive flows built on it.
//!
//! One mutex guards all session mutation and is held for the entire span of
//! an interactive call, including blocking reads from the input stream. Two
//! concurrent callers therefore never interleave prompt output, at the cost
//! that a suspended call holds the lock until its command loop finishes.
//! This serialization point is intentional.

use std::collections::BTreeMap;
use std::fmt;
use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use ti_core::{ArrayView, Element, locate_prefix, parse_coordinate_text};
use ti_format::{array_info, format_array, format_sub_view};
use ti_scan::{ScanReport, render_matches};
use ti_serialize::{EncodeError, write_npy_file};

#[derive(Debug, Default)]
struct Counters {
    print_visits: BTreeMap<String, u64>,
    check_visits: BTreeMap<String, u64>,
    dump_visits: BTreeMap<String, u64>,
    print_skip_all: bool,
    check_skip_all: bool,
}

/// Shared inspection session: visit counters keyed by tag for the
/// interactive-print, value-check, and dump flows, plus the two one-way
/// skip-all flags. Created once by the embedding application and passed by
/// reference into every interactive call; lives for the process duration.
#[derive(Debug, Default)]
pub struct SessionState {
    inner: Mutex<Counters>,
}

impl SessionState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // Counters and flags are monotonic, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Post-increment visit count for a dump tag; the returned value names
    /// the dump file.
    pub fn next_dump_visit(&self, tag: &str) -> u64 {
        let mut guard = self.lock();
        next_visit(&mut guard.dump_visits, tag)
    }

    #[must_use]
    pub fn print_visit_count(&self, tag: &str) -> u64 {
        self.lock().print_visits.get(tag).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn check_visit_count(&self, tag: &str) -> u64 {
        self.lock().check_visits.get(tag).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn print_skip_all(&self) -> bool {
        self.lock().print_skip_all
    }

    #[must_use]
    pub fn check_skip_all(&self) -> bool {
        self.lock().check_skip_all
    }
}

fn next_visit(visits: &mut BTreeMap<String, u64>, tag: &str) -> u64 {
    let counter = visits.entry(tag.to_string()).or_insert(0);
    *counter += 1;
    *counter
}

#[derive(Debug)]
pub enum SessionError {
    Io(std::io::Error),
    Encode(EncodeError),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(error) => write!(f, "session stream failure: {error}"),
            Self::Encode(error) => write!(f, "session dump failure: {error}"),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(error) => Some(error),
            Self::Encode(error) => Some(error),
        }
    }
}

impl From<std::io::Error> for SessionError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<EncodeError> for SessionError {
    fn from(value: EncodeError) -> Self {
        Self::Encode(value)
    }
}

// One whitespace-delimited token, skipping leading whitespace. None at end
// of input.
fn read_token<R: BufRead>(input: &mut R) -> std::io::Result<Option<String>> {
    let mut token = Vec::new();
    loop {
        let buf = input.fill_buf()?;
        if buf.is_empty() {
            break;
        }
        let mut used = 0;
        let mut done = false;
        for &byte in buf {
            used += 1;
            if byte.is_ascii_whitespace() {
                if token.is_empty() {
                    continue;
                }
                done = true;
                break;
            }
            token.push(byte);
        }
        input.consume(used);
        if done {
            break;
        }
    }
    if token.is_empty() {
        Ok(None)
    } else {
        Ok(Some(String::from_utf8_lossy(&token).into_owned()))
    }
}

// One full line, so a tag containing whitespace is seen and can be rejected
// rather than silently truncated at the first space.
fn read_line<R: BufRead>(input: &mut R) -> std::io::Result<Option<String>> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

/// Interactive-print flow.
///
/// Locks the session for the whole call and bumps the tag's print visit
/// counter. When the print skip-all flag is already set the call returns
/// immediately with no output. Commands: `b` break, `e` render the entire
/// array, `s` set skip-all for this flow, `d` dump to an npy file under
/// `dump_dir`, or a comma-separated coordinate prefix to render a sub-view.
pub fn interactive_print<T, R, W>(
    state: &SessionState,
    view: &ArrayView<'_, T>,
    input: &mut R,
    output: &mut W,
    dump_dir: &Path,
    tag: &str,
) -> Result<(), SessionError>
where
    T: Element,
    R: BufRead,
    W: Write,
{
    let mut guard = state.lock();
    let visit = next_visit(&mut guard.print_visits, tag);
    let info = array_info::<T>(view.shape());

    while !guard.print_skip_all {
        writeln!(output, "----------Interactive Print----------")?;
        if !tag.is_empty() {
            writeln!(output, "Tag: {tag}  Visit: {visit}")?;
        }
        writeln!(output, "{info}")?;
        writeln!(output, "Please specify the position, separated by \",\"")?;
        write!(
            output,
            "\"e\" for the entire tensor, \"d\" to dump value to file, \"b\" to break, \"s\" to skip all: "
        )?;
        output.flush()?;

        let Some(token) = read_token(input)? else {
            break;
        };
        match token.as_str() {
            "b" => break,
            "e" => {
                write!(output, "{}", format_array(view))?;
            }
            "s" => {
                guard.print_skip_all = true;
                debug!(tag, "interactive print skip-all set");
                break;
            }
            "d" => {
                let done = prompt_dump(&mut guard, view, input, output, dump_dir)?;
                if !done {
                    break;
                }
            }
            text => match parse_coordinate_text(view.shape(), text)
                .ok()
                .and_then(|coord| locate_prefix(view.shape(), &coord).ok())
                .and_then(|sub| format_sub_view(view, &sub).ok())
            {
                Some(rendered) => write!(output, "{rendered}")?,
                None => writeln!(output, "invalid input")?,
            },
        }
    }
    Ok(())
}

// Tag sub-prompt of the `d` command. Re-prompts while the entered tag is
// empty or contains whitespace. Returns false when the input stream ended.
fn prompt_dump<T, R, W>(
    guard: &mut Counters,
    view: &ArrayView<'_, T>,
    input: &mut R,
    output: &mut W,
    dump_dir: &Path,
) -> Result<bool, SessionError>
where
    T: Element,
    R: BufRead,
    W: Write,
{
    loop {
        write!(output, "Please enter a tag: ")?;
        output.flush()?;
        let Some(tag) = read_line(input)? else {
            return Ok(false);
        };
        if tag.is_empty() || tag.contains(char::is_whitespace) {
            write!(output, "Invalid input. ")?;
            continue;
        }
        let visit = next_visit(&mut guard.dump_visits, &tag);
        write_npy_file(dump_dir, &tag, visit, view)?;
        return Ok(true);
    }
}

/// Value-check flow, run after a scan over the same view.
///
/// Locks the session for the whole call and bumps the tag's check visit
/// counter; returns silently when the check skip-all flag is set. Commands:
/// `p` print the cached match-coordinate list, `b` break, `s` set skip-all
/// for this flow.
pub fn check_value_session<R, W>(
    state: &SessionState,
    report: &ScanReport,
    input: &mut R,
    output: &mut W,
    tag: &str,
) -> Result<(), SessionError>
where
    R: BufRead,
    W: Write,
{
    let mut guard = state.lock();
    let visit = next_visit(&mut guard.check_visits, tag);
    let rendered = render_matches(report);

    while !guard.check_skip_all {
        writeln!(output, "----------Value Check----------")?;
        if !tag.is_empty() {
            writeln!(output, "Tag: {tag}  Visit: {visit}")?;
        }
        writeln!(output, "{} value(s) found.", report.count)?;
        write!(
            output,
            "\"p\" to print the coordinates, \"b\" to break, \"s\" to skip all: "
        )?;
        output.flush()?;

        let Some(token) = read_token(input)? else {
            break;
        };
        match token.as_str() {
            "b" => break,
            "p" => writeln!(output, "{rendered}")?,
            "s" => {
                guard.check_skip_all = true;
                debug!(tag, "value check skip-all set");
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use ti_core::ArrayView;
    use ti_scan::{CheckerKind, scan};

    use super::{SessionState, check_value_session, interactive_print, read_token};

    fn run_print(state: &SessionState, commands: &str, tag: &str) -> String {
        let data = [1i32, 2, 3, 4, 5, 6];
        let view = ArrayView::new(&data, &[2, 3]).expect("valid view");
        let dir = tempfile::tempdir().expect("scratch dir");
        let mut input = Cursor::new(commands.as_bytes().to_vec());
        let mut output = Vec::new();
        interactive_print(state, &view, &mut input, &mut output, dir.path(), tag)
            .expect("session should not fail");
        String::from_utf8(output).expect("prompt output is UTF-8")
    }

    #[test]
    fn token_reader_splits_on_whitespace() {
        let mut input = Cursor::new(b"  e \n1,2\nb".to_vec());
        assert_eq!(
            read_token(&mut input).expect("read"),
            Some("e".to_string())
        );
        assert_eq!(
            read_token(&mut input).expect("read"),
            Some("1,2".to_string())
        );
        assert_eq!(
            read_token(&mut input).expect("read"),
            Some("b".to_string())
        );
        assert_eq!(read_token(&mut input).expect("read"), None);
    }

    #[test]
    fn break_command_ends_the_call_after_one_prompt() {
        let state = SessionState::new();
        let output = run_print(&state, "b\n", "conv0");
        assert_eq!(
            output.matches("----------Interactive Print----------").count(),
            1
        );
        assert!(output.contains("Tag: conv0  Visit: 1"));
        assert!(output.contains("<i32 Tensor 2x3>"));
        assert_eq!(state.print_visit_count("conv0"), 1);
    }

    #[test]
    fn entire_tensor_command_renders_and_reprompts() {
        let state = SessionState::new();
        let output = run_print(&state, "e\nb\n", "");
        assert!(output.contains("[[1, 2, 3], [4, 5, 6]]"));
        assert!(!output.contains("Tag:"));
        assert_eq!(
            output.matches("----------Interactive Print----------").count(),
            2
        );
    }

    #[test]
    fn coordinate_prefix_renders_sub_view() {
        let state = SessionState::new();
        let output = run_print(&state, "1\nb\n", "t");
        assert!(output.contains("[4, 5, 6]\n<i32 Tensor 3>\n"));
    }

    #[test]
    fn full_coordinate_renders_scalar() {
        let state = SessionState::new();
        let output = run_print(&state, "1,2\nb\n", "t");
        assert!(output.contains("6\n<i32>\n"));
    }

    #[test]
    fn malformed_coordinates_report_invalid_input() {
        let state = SessionState::new();
        let output = run_print(&state, "9,9\nx\n0,1,2,3\nb\n", "t");
        assert_eq!(output.matches("invalid input").count(), 3);
    }

    #[test]
    fn skip_all_suppresses_later_calls_for_every_tag() {
        let state = SessionState::new();
        let first = run_print(&state, "s\n", "a");
        assert!(first.contains("Interactive Print"));
        assert!(state.print_skip_all());

        let second = run_print(&state, "b\n", "b");
        assert!(second.is_empty());
        // Visit counters still advance while prompting is suppressed.
        assert_eq!(state.print_visit_count("b"), 1);
    }

    #[test]
    fn repeated_calls_increment_the_tag_visit_counter() {
        let state = SessionState::new();
        run_print(&state, "b\n", "t");
        let output = run_print(&state, "b\n", "t");
        assert!(output.contains("Tag: t  Visit: 2"));
    }

    #[test]
    fn dump_command_writes_a_counted_npy_file() {
        let state = SessionState::new();
        let data = [0.0f32; 4];
        let view = ArrayView::new(&data, &[4]).expect("valid view");
        let dir = tempfile::tempdir().expect("scratch dir");

        let mut input = Cursor::new(b"d\nt\nd\nt\nb\n".to_vec());
        let mut output = Vec::new();
        interactive_print(&state, &view, &mut input, &mut output, dir.path(), "site")
            .expect("session should not fail");

        assert!(dir.path().join("t_1.npy").is_file());
        assert!(dir.path().join("t_2.npy").is_file());
    }

    #[test]
    fn whitespace_dump_tag_is_reprompted_not_truncated() {
        let state = SessionState::new();
        let data = [1u8, 2];
        let view = ArrayView::new(&data, &[2]).expect("valid view");
        let dir = tempfile::tempdir().expect("scratch dir");

        let mut input = Cursor::new(b"d\nbad tag\nok\nb\n".to_vec());
        let mut output = Vec::new();
        interactive_print(&state, &view, &mut input, &mut output, dir.path(), "")
            .expect("session should not fail");

        let text = String::from_utf8(output).expect("prompt output is UTF-8");
        assert!(text.contains("Invalid input. "));
        assert_eq!(text.matches("Please enter a tag: ").count(), 2);
        assert!(!dir.path().join("bad tag_1.npy").exists());
        assert!(dir.path().join("ok_1.npy").is_file());
    }

    #[test]
    fn end_of_input_ends_the_call() {
        let state = SessionState::new();
        let output = run_print(&state, "", "t");
        assert_eq!(
            output.matches("----------Interactive Print----------").count(),
            1
        );
    }

    #[test]
    fn check_session_prints_cached_match_list() {
        let state = SessionState::new();
        let data = [-1i32, 0, 1, -2];
        let view = ArrayView::new(&data, &[4]).expect("valid view");
        let report = scan(&view, CheckerKind::Negative);

        let mut input = Cursor::new(b"p\nb\n".to_vec());
        let mut output = Vec::new();
        check_value_session(&state, &report, &mut input, &mut output, "chk")
            .expect("session should not fail");

        let text = String::from_utf8(output).expect("prompt output is UTF-8");
        assert!(text.contains("----------Value Check----------"));
        assert!(text.contains("Tag: chk  Visit: 1"));
        assert!(text.contains("2 value(s) found."));
        assert!(text.contains("[(0), (3)]"));
        assert_eq!(state.check_visit_count("chk"), 1);
    }

    #[test]
    fn check_session_skip_all_is_independent_of_print_flow() {
        let state = SessionState::new();
        let data = [0i32; 2];
        let view = ArrayView::new(&data, &[2]).expect("valid view");
        let report = scan(&view, CheckerKind::Zero);

        let mut input = Cursor::new(b"s\n".to_vec());
        let mut output = Vec::new();
        check_value_session(&state, &report, &mut input, &mut output, "chk")
            .expect("session should not fail");
        assert!(state.check_skip_all());
        assert!(!state.print_skip_all());

        let mut input = Cursor::new(b"p\n".to_vec());
        let mut output = Vec::new();
        check_value_session(&state, &report, &mut input, &mut output, "other")
            .expect("session should not fail");
        assert!(output.is_empty());

        // The print flow still prompts.
        let printed = run_print(&state, "b\n", "t");
        assert!(printed.contains("Interactive Print"));
    }

    #[test]
    fn next_dump_visit_is_post_incremented_per_tag() {
        let state = SessionState::new();
        assert_eq!(state.next_dump_visit("t"), 1);
        assert_eq!(state.next_dump_visit("t"), 2);
        assert_eq!(state.next_dump_visit("u"), 1);
    }
}
