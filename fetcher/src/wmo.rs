//! WMO weather interpretation codes, as reported by the upstream API.

/// Maps a WMO code to its human-readable condition. Codes outside the
/// table keep their number visible downstream as `WMO-<n>` so new upstream
/// codes never silently collapse into a catch-all tag.
pub fn condition(code: u32) -> String {
    let label = match code {
        0 => "Clear",
        1 => "Mainly Clear",
        2 => "Partly Cloudy",
        3 => "Overcast",
        45 => "Fog",
        48 => "Depositing Rime Fog",
        51 => "Light Drizzle",
        53 => "Drizzle",
        55 => "Dense Drizzle",
        56 => "Freezing Drizzle",
        57 => "Dense Freezing Drizzle",
        61 => "Light Rain",
        63 => "Rain",
        65 => "Heavy Rain",
        66 => "Freezing Rain",
        67 => "Heavy Freezing Rain",
        71 => "Light Snow",
        73 => "Snow",
        75 => "Heavy Snow",
        77 => "Snow Grains",
        80 => "Light Rain Showers",
        81 => "Rain Showers",
        82 => "Violent Rain Showers",
        85 => "Snow Showers",
        86 => "Heavy Snow Showers",
        95 => "Thunderstorm",
        96 => "Thunderstorm With Hail",
        99 => "Thunderstorm With Heavy Hail",
        other => return format!("WMO-{other}"),
    };
    label.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_codes() {
        assert_eq!(condition(0), "Clear");
        assert_eq!(condition(3), "Overcast");
        assert_eq!(condition(63), "Rain");
        assert_eq!(condition(73), "Snow");
        assert_eq!(condition(95), "Thunderstorm");
    }

    #[test]
    fn test_unknown_code_keeps_number() {
        assert_eq!(condition(42), "WMO-42");
        assert_eq!(condition(100), "WMO-100");
    }
}
