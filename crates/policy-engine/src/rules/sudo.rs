use time::OffsetDateTime;

use curfew_core::config::SudoersConfig;
use curfew_core::window::first_active;

/// Whether the allowed sudoers line should be in place at `now`.
/// An unmanaged sudoers setup never restricts.
pub fn sudo_allowed(settings: &SudoersConfig, now: OffsetDateTime) -> bool {
    if !settings.enabled {
        return true;
    }
    first_active(&settings.time_allowed, now).is_some()
}
