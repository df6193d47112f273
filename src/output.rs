//! Terminal rendering for session status and narration progress.
//! Everything goes to stderr so stdout stays usable for `segment` output.

use crate::narration::pipeline::NarrationSummary;
use crate::session::controller::SessionStatus;
use crate::session::state::SleepState;

const DIM: &str = "\x1b[2m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RED: &str = "\x1b[31m";
const CYAN: &str = "\x1b[36m";
const RESET: &str = "\x1b[0m";

/// Clear the current terminal line.
pub fn clear_line() {
    eprint!("\r\x1b[2K");
}

fn state_color(state: SleepState) -> &'static str {
    match state {
        SleepState::Guiding => CYAN,
        SleepState::Narrating => GREEN,
        SleepState::Quiet => DIM,
    }
}

pub fn format_state(state: SleepState) -> String {
    format!("{}● {state}{RESET}", state_color(state))
}

pub fn format_summary(summary: &NarrationSummary) -> String {
    let mut line = format!(
        "Narration finished: {}/{} segments",
        summary.completed, summary.segments
    );
    if summary.failed > 0 {
        line.push_str(&format!(" {YELLOW}({} failed){RESET}", summary.failed));
    }
    if summary.aborted {
        line.push_str(&format!(" {RED}aborted{RESET}"));
    }
    line
}

/// Lines describing what changed between two status snapshots.
pub fn status_changes(previous: &SessionStatus, current: &SessionStatus) -> Vec<String> {
    let mut lines = Vec::new();
    if previous.running != current.running {
        lines.push(if current.running {
            format!("{GREEN}Session started{RESET}")
        } else {
            format!("{DIM}Session stopped{RESET}")
        });
    }
    if current.last_narration != previous.last_narration
        && let Some(summary) = &current.last_narration
    {
        lines.push(format_summary(summary));
    }
    if previous.state != current.state {
        lines.push(format_state(current.state));
    }
    if previous.listening != current.listening {
        lines.push(if current.listening {
            format!("{DIM}listening...{RESET}")
        } else {
            format!("{DIM}...{RESET}")
        });
    }
    lines
}

pub fn render_status_change(previous: &SessionStatus, current: &SessionStatus) {
    for line in status_changes(previous, current) {
        clear_line();
        eprintln!("{line}");
    }
}

/// Numbered segment listing, one per line.
pub fn format_segments(segments: &[String]) -> String {
    let width = segments.len().to_string().len();
    let mut out = String::new();
    for (index, segment) in segments.iter().enumerate() {
        out.push_str(&format!(
            "[{:>width$}] ({} chars) {}\n",
            index + 1,
            segment.chars().count(),
            segment.replace('\n', " ")
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(state: SleepState) -> SessionStatus {
        SessionStatus {
            state,
            running: true,
            ..SessionStatus::default()
        }
    }

    #[test]
    fn state_line_names_state() {
        assert!(format_state(SleepState::Narrating).contains("narrating"));
        assert!(format_state(SleepState::Quiet).contains("quiet"));
    }

    #[test]
    fn summary_mentions_failures_and_abort() {
        let clean = NarrationSummary {
            segments: 3,
            completed: 3,
            failed: 0,
            aborted: false,
        };
        assert_eq!(format_summary(&clean), "Narration finished: 3/3 segments");

        let aborted = NarrationSummary {
            segments: 4,
            completed: 1,
            failed: 1,
            aborted: true,
        };
        let line = format_summary(&aborted);
        assert!(line.contains("1/4"), "got: {line}");
        assert!(line.contains("1 failed"), "got: {line}");
        assert!(line.contains("aborted"), "got: {line}");
    }

    #[test]
    fn unchanged_status_prints_nothing() {
        let s = status(SleepState::Guiding);
        assert!(status_changes(&s, &s).is_empty());
    }

    #[test]
    fn narration_end_prints_summary_before_state() {
        let before = status(SleepState::Narrating);
        let after = SessionStatus {
            last_narration: Some(NarrationSummary {
                segments: 2,
                completed: 2,
                ..NarrationSummary::default()
            }),
            ..status(SleepState::Quiet)
        };
        let lines = status_changes(&before, &after);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Narration finished"));
        assert!(lines[1].contains("quiet"));
    }

    #[test]
    fn segments_are_numbered_with_char_counts() {
        let out = format_segments(&["第一段。".to_string(), "second\nline".to_string()]);
        assert_eq!(out, "[1] (4 chars) 第一段。\n[2] (11 chars) second line\n");
    }
}
