//! Forbidden-program policy.
//!
//! A program with no windows is forbidden at all times. Matching against a
//! running process is a case-insensitive substring test on the process name,
//! with a short list of names that are never touched.

use time::OffsetDateTime;

use curfew_core::config::ForbiddenProgram;
use curfew_core::window::first_active;

/// Process names that are never killed, whatever the filter says.
pub const PROTECTED_NAMES: [&str; 3] = ["curfew", "systemd", "kernel"];

pub fn program_forbidden(program: &ForbiddenProgram, now: OffsetDateTime) -> bool {
    program.time_windows.is_empty() || first_active(&program.time_windows, now).is_some()
}

/// Programs from `programs` that are forbidden at `now`.
pub fn forbidden_now(programs: &[ForbiddenProgram], now: OffsetDateTime) -> Vec<&ForbiddenProgram> {
    programs
        .iter()
        .filter(|program| program_forbidden(program, now))
        .collect()
}

pub fn is_protected(process_name: &str) -> bool {
    let lower = process_name.to_ascii_lowercase();
    PROTECTED_NAMES.iter().any(|name| lower.contains(name))
}

/// Whether `process_name` is caught by the forbidden `filter`.
pub fn matches_process(filter: &str, process_name: &str) -> bool {
    let filter = filter.trim().to_ascii_lowercase();
    if filter.is_empty() || is_protected(process_name) {
        return false;
    }
    process_name.to_ascii_lowercase().contains(&filter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use curfew_core::window::{Day, TimeWindow};
    use time::macros::datetime;

    #[test]
    fn program_without_windows_is_always_forbidden() {
        let program = ForbiddenProgram { name: "steam".into(), time_windows: Vec::new() };
        assert!(program_forbidden(&program, datetime!(2024-01-01 03:00 UTC)));
    }

    #[test]
    fn windowed_program() {
        let program = ForbiddenProgram {
            name: "discord".into(),
            time_windows: vec![TimeWindow::new("09:00", "17:00", &Day::WEEKDAYS).unwrap()],
        };
        let programs = vec![program];
        assert_eq!(forbidden_now(&programs, datetime!(2024-01-01 10:00 UTC)).len(), 1);
        assert!(forbidden_now(&programs, datetime!(2024-01-06 10:00 UTC)).is_empty());
    }

    #[test]
    fn process_matching_skips_protected_names() {
        assert!(matches_process("Steam", "steamwebhelper"));
        assert!(!matches_process("steam", "firefox"));
        assert!(!matches_process("d", "systemd"));
        assert!(!matches_process("curfew", "curfew"));
        assert!(!matches_process("  ", "anything"));
    }
}
