//! Text for the `status` and `info` replies.

use time::OffsetDateTime;

use alerts::{format_duration, format_timestamp};
use curfew_core::config::Config;
use curfew_core::ipc::END_MARKER;
use curfew_core::types::{PanicState, TempUnblock};
use curfew_core::window::format_windows;
use enforcer::EnforcementSnapshot;
use monitor::ViolationTracker;

const LISTED_WINDOWED_DOMAINS: usize = 10;

fn banner(lines: &mut Vec<String>, title: &str) {
    lines.push(title.to_string());
    lines.push("=".repeat(title.len()));
    lines.push(String::new());
}

fn finish(mut lines: Vec<String>) -> Vec<String> {
    lines.push(String::new());
    lines.push(END_MARKER.to_string());
    lines
}

pub fn render_status(
    snapshot: &EnforcementSnapshot,
    unblocks: &[TempUnblock],
    panic: PanicState,
    sudoers_enabled: bool,
    violations: &ViolationTracker,
    now: OffsetDateTime,
) -> Vec<String> {
    let mut lines = Vec::new();
    banner(&mut lines, "RUNTIME STATUS");
    lines.push(format!("Current Time: {}", format_timestamp(now)));
    lines.push("Service Status: Running".to_string());
    lines.push(format!(
        "Last Enforcement: {}",
        snapshot
            .last_enforcement
            .map(format_timestamp)
            .unwrap_or_else(|| "never".to_string())
    ));
    lines.push(String::new());

    let active: Vec<&TempUnblock> = unblocks.iter().filter(|unblock| unblock.is_active(now)).collect();
    lines.push(format!("Currently Blocked Domains: {}", snapshot.last_blocked_count));
    lines.push(format!("Temporary Unblocks: {} active", active.len()));
    if !active.is_empty() {
        lines.push("  Active temporary unblocks:".to_string());
        for unblock in active {
            lines.push(format!(
                "    - {} (expires in {})",
                unblock.domain,
                format_duration(unblock.expires_at - now)
            ));
        }
    }

    if sudoers_enabled {
        let state = if snapshot.last_sudoers_locked { "locked" } else { "allowed" };
        lines.push(format!("Sudo Access: {state}"));
    }

    if let Some(remaining) = panic.remaining(now) {
        lines.push(String::new());
        lines.push("PANIC MODE ACTIVE".to_string());
        lines.push(format!("Time Remaining: {}", format_duration(remaining)));
    }

    let tracking = violations.settings();
    if tracking.enabled {
        lines.push(String::new());
        lines.push("Violation Tracking:".to_string());
        lines.push(format!(
            "  Recent Violations: {}/{} (in last {} minutes)",
            violations.recent_count(now),
            tracking.max_violations,
            tracking.window().whole_minutes()
        ));
        lines.push(format!("  Total Violations: {}", violations.total()));
        if tracking.reset_daily {
            lines.push(format!("  Last Reset: {}", format_timestamp(violations.last_reset())));
        }
    }
    finish(lines)
}

pub fn render_info(config: &Config, snapshot: &EnforcementSnapshot) -> Vec<String> {
    let mut lines = Vec::new();
    banner(&mut lines, "CONFIGURATION INFO");
    lines.push(format!("Enforcement Interval: {} seconds", config.enforce_interval().as_secs()));

    let windowed = &snapshot.time_window_domains;
    let windowed_blocked = snapshot.last_time_window_state.values().filter(|blocked| **blocked).count();
    lines.push(format!(
        "Blocked Domains: {} ({} always blocked, {} time-based)",
        snapshot.last_blocked_count,
        snapshot.last_blocked_count.saturating_sub(windowed_blocked),
        windowed.len()
    ));
    lines.push(String::new());

    if !windowed.is_empty() {
        lines.push(format!("Time-Based Domains ({}):", windowed.len()));
        for rule in windowed.iter().take(LISTED_WINDOWED_DOMAINS) {
            lines.push(format!("  {}: {}", rule.name, format_windows(&rule.time_windows)));
        }
        if windowed.len() > LISTED_WINDOWED_DOMAINS {
            lines.push(format!("  ... and {} more", windowed.len() - LISTED_WINDOWED_DOMAINS));
        }
        lines.push(String::new());
    }

    let programs = &config.forbidden_programs.programs;
    if config.enable_forbidden_programs && config.forbidden_programs.enabled && !programs.is_empty() {
        lines.push(format!("Forbidden Programs ({}):", programs.len()));
        let always: Vec<&str> = programs
            .iter()
            .filter(|program| program.time_windows.is_empty())
            .map(|program| program.name.as_str())
            .collect();
        if !always.is_empty() {
            lines.push(format!("  always: {}", always.join(", ")));
        }
        for program in programs.iter().filter(|program| !program.time_windows.is_empty()) {
            lines.push(format!("  {}: {}", program.name, format_windows(&program.time_windows)));
        }
        lines.push(String::new());
    }

    let keywords = &config.extension_keywords;
    if !keywords.url_keywords.is_empty() || !keywords.content_keywords.is_empty() {
        lines.push("Extension Keywords:".to_string());
        if !keywords.url_keywords.is_empty() {
            lines.push(format!(
                "  URL Keywords ({}): {}",
                keywords.url_keywords.len(),
                keywords.url_keywords.join(", ")
            ));
        }
        if !keywords.content_keywords.is_empty() {
            lines.push(format!(
                "  Content Keywords ({}): {}",
                keywords.content_keywords.len(),
                keywords.content_keywords.join(", ")
            ));
        }
        if !keywords.whitelist.is_empty() {
            lines.push(format!("  Whitelisted: {} domains", keywords.whitelist.len()));
        }
    }
    finish(lines)
}
