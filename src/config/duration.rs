//! # Durations
//!
//! Parsing of Kubernetes-style duration strings used by CLI flags.

use crate::error::Error;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

static DURATION_REGEX: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(\d+[smhd])+$").ok());

static COMPONENT_REGEX: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?P<number>\d+)(?P<unit>[smhd])").ok());

fn unit_seconds(unit: &str) -> u64 {
    match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        _ => 86400,
    }
}

/// Parse Kubernetes duration string into std::time::Duration
/// Supports formats: "30s", "5m", "24h", "1d" and compounds such as "1h30m"
pub fn parse_kubernetes_duration(duration_str: &str) -> Result<Duration, Error> {
    let duration_trimmed = duration_str.trim();

    if duration_trimmed.is_empty() {
        return Err(Error::validation("duration string cannot be empty"));
    }

    let (Some(duration_regex), Some(component_regex)) =
        (DURATION_REGEX.as_ref(), COMPONENT_REGEX.as_ref())
    else {
        return Err(Error::validation("failed to compile duration regex"));
    };

    let interval_lower = duration_trimmed.to_lowercase();
    if !duration_regex.is_match(&interval_lower) {
        return Err(Error::validation(format!(
            "invalid duration format '{duration_trimmed}'. Expected format: <number><unit>... (e.g., '30s', '5m', '1h30m')"
        )));
    }

    let overflow =
        || Error::validation(format!("duration '{duration_trimmed}' is too large"));

    let mut seconds: u64 = 0;
    for captures in component_regex.captures_iter(&interval_lower) {
        let number: u64 = captures["number"].parse().map_err(|_| overflow())?;
        let component = number
            .checked_mul(unit_seconds(&captures["unit"]))
            .ok_or_else(overflow)?;
        seconds = seconds.checked_add(component).ok_or_else(overflow)?;
    }

    if seconds == 0 {
        return Err(Error::validation(format!(
            "duration must be greater than 0, got '{duration_trimmed}'"
        )));
    }

    Ok(Duration::from_secs(seconds))
}
