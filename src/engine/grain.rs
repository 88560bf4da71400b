use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Named time-bucket size, identified by its ISO-8601 duration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TimeGrain {
    #[serde(rename = "PT1S", alias = "second")]
    Second,
    #[serde(rename = "PT1M", alias = "minute")]
    Minute,
    #[serde(rename = "PT5M", alias = "5 minutes")]
    FiveMinutes,
    #[serde(rename = "PT15M", alias = "15 minutes")]
    FifteenMinutes,
    #[serde(rename = "PT0.5H", alias = "half hour")]
    HalfHour,
    #[serde(rename = "PT1H", alias = "hour")]
    Hour,
    #[serde(rename = "P1D", alias = "day")]
    Day,
    #[serde(rename = "P1W", alias = "week")]
    Week,
    #[serde(rename = "P1M", alias = "month")]
    Month,
    #[serde(rename = "P0.25Y", alias = "quarter")]
    Quarter,
    #[serde(rename = "P1Y", alias = "year")]
    Year,
}

impl TimeGrain {
    pub const ALL: [TimeGrain; 11] = [
        TimeGrain::Second,
        TimeGrain::Minute,
        TimeGrain::FiveMinutes,
        TimeGrain::FifteenMinutes,
        TimeGrain::HalfHour,
        TimeGrain::Hour,
        TimeGrain::Day,
        TimeGrain::Week,
        TimeGrain::Month,
        TimeGrain::Quarter,
        TimeGrain::Year,
    ];

    pub fn iso_duration(&self) -> &'static str {
        match self {
            TimeGrain::Second => "PT1S",
            TimeGrain::Minute => "PT1M",
            TimeGrain::FiveMinutes => "PT5M",
            TimeGrain::FifteenMinutes => "PT15M",
            TimeGrain::HalfHour => "PT0.5H",
            TimeGrain::Hour => "PT1H",
            TimeGrain::Day => "P1D",
            TimeGrain::Week => "P1W",
            TimeGrain::Month => "P1M",
            TimeGrain::Quarter => "P0.25Y",
            TimeGrain::Year => "P1Y",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TimeGrain::Second => "second",
            TimeGrain::Minute => "minute",
            TimeGrain::FiveMinutes => "5 minutes",
            TimeGrain::FifteenMinutes => "15 minutes",
            TimeGrain::HalfHour => "half hour",
            TimeGrain::Hour => "hour",
            TimeGrain::Day => "day",
            TimeGrain::Week => "week",
            TimeGrain::Month => "month",
            TimeGrain::Quarter => "quarter",
            TimeGrain::Year => "year",
        }
    }
}

impl std::fmt::Display for TimeGrain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.iso_duration())
    }
}

impl FromStr for TimeGrain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        TimeGrain::ALL
            .iter()
            .copied()
            .find(|g| g.iso_duration() == needle || g.name().eq_ignore_ascii_case(needle))
            .ok_or_else(|| format!("unknown time grain '{}'", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_grain() {
        assert_eq!("P1D".parse::<TimeGrain>().unwrap(), TimeGrain::Day);
        assert_eq!("Week".parse::<TimeGrain>().unwrap(), TimeGrain::Week);
        assert!("P2D".parse::<TimeGrain>().is_err());
    }

    #[test]
    fn test_serde_names() {
        let grain: TimeGrain = serde_json::from_str("\"PT1H\"").unwrap();
        assert_eq!(grain, TimeGrain::Hour);
        let grain: TimeGrain = serde_json::from_str("\"month\"").unwrap();
        assert_eq!(grain, TimeGrain::Month);
        assert_eq!(serde_json::to_string(&TimeGrain::Quarter).unwrap(), "\"P0.25Y\"");
    }
}
