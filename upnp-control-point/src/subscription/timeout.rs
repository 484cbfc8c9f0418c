use std::time::Duration;

/// Used when a TIMEOUT header is missing, infinite or unparsable
pub const DEFAULT_SUBSCRIPTION_TIMEOUT: Duration = Duration::from_secs(300);

/// Parse a GENA `TIMEOUT` header value such as `Second-1800`.
///
/// Matching is case-insensitive. `infinite` is deprecated in UPnP 2.0 and
/// maps to the default, as does anything that is not `Second-<N>`.
pub fn parse_timeout(header: Option<&str>) -> Duration {
    let Some(value) = header.map(|value| value.trim().to_ascii_lowercase()) else {
        return DEFAULT_SUBSCRIPTION_TIMEOUT;
    };
    if value.is_empty() || value.contains("infinite") {
        return DEFAULT_SUBSCRIPTION_TIMEOUT;
    }

    let Some(position) = value.find("second-") else {
        return DEFAULT_SUBSCRIPTION_TIMEOUT;
    };
    value[position + "second-".len()..]
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_SUBSCRIPTION_TIMEOUT)
}
