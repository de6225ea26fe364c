//! CF-convention time axes ("<unit> since <reference>").

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};

use crate::error::{GridProcessorError, Result};

/// Units written on every time axis we produce.
pub const CANONICAL_TIME_UNITS: &str = "days since 1970-01-01 00:00:00";

const SUPPORTED_CALENDARS: &[&str] = &["standard", "gregorian", "proleptic_gregorian"];

/// Parsed CF time units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeUnits {
    seconds_per_unit: f64,
    reference: NaiveDateTime,
}

impl TimeUnits {
    pub fn parse(units: &str) -> Result<Self> {
        let (unit, reference) = units
            .split_once(" since ")
            .ok_or_else(|| GridProcessorError::schema(format!("unrecognised time units '{}'", units)))?;

        let seconds_per_unit = match unit.trim().to_lowercase().as_str() {
            "seconds" | "second" | "secs" | "s" => 1.0,
            "minutes" | "minute" | "mins" | "min" => 60.0,
            "hours" | "hour" | "hrs" | "h" => 3600.0,
            "days" | "day" | "d" => 86_400.0,
            other => {
                return Err(GridProcessorError::schema(format!(
                    "unsupported time unit '{}'",
                    other
                )))
            }
        };

        Ok(Self {
            seconds_per_unit,
            reference: parse_reference(reference)?,
        })
    }

    pub fn canonical() -> Self {
        Self {
            seconds_per_unit: 86_400.0,
            reference: NaiveDate::from_ymd_opt(1970, 1, 1)
                .unwrap_or_default()
                .and_time(NaiveTime::MIN),
        }
    }

    /// Offset value to timestamp. Sub-second precision is rounded to
    /// milliseconds.
    pub fn decode(&self, value: f64) -> Result<NaiveDateTime> {
        if !value.is_finite() {
            return Err(GridProcessorError::schema("non-finite time value"));
        }
        let millis = (value * self.seconds_per_unit * 1000.0).round() as i64;
        self.reference
            .checked_add_signed(Duration::milliseconds(millis))
            .ok_or_else(|| GridProcessorError::schema(format!("time value {} out of range", value)))
    }

    pub fn encode(&self, time: NaiveDateTime) -> f64 {
        let delta = time - self.reference;
        delta.num_milliseconds() as f64 / 1000.0 / self.seconds_per_unit
    }
}

fn parse_reference(text: &str) -> Result<NaiveDateTime> {
    let text = text
        .trim()
        .trim_end_matches(" UTC")
        .trim_end_matches('Z')
        .trim_end_matches("+00:00");

    const FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    for format in FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(dt);
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .map(|d| d.and_time(NaiveTime::MIN))
        .map_err(|_| GridProcessorError::schema(format!("unparseable time reference '{}'", text)))
}

/// Decode a time coordinate's values using its `units`/`calendar` attributes.
pub fn decode_axis(values: &[f64], units: Option<&str>, calendar: Option<&str>) -> Result<Vec<NaiveDateTime>> {
    if let Some(calendar) = calendar {
        if !SUPPORTED_CALENDARS.contains(&calendar.to_lowercase().as_str()) {
            return Err(GridProcessorError::schema(format!(
                "unsupported calendar '{}'",
                calendar
            )));
        }
    }
    let units = TimeUnits::parse(units.ok_or_else(|| {
        GridProcessorError::schema("time coordinate has no units attribute")
    })?)?;
    values.iter().map(|&v| units.decode(v)).collect()
}

/// Days since 1970-01-01 for a calendar date.
pub fn date_to_days(date: NaiveDate) -> f64 {
    TimeUnits::canonical().encode(date.and_time(NaiveTime::MIN))
}

/// Inverse of [`date_to_days`]; fractional days are truncated to the date.
pub fn days_to_date(days: f64) -> Result<NaiveDate> {
    Ok(TimeUnits::canonical().decode(days.floor())?.date())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd_hms(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_parse_units() {
        let units = TimeUnits::parse("hours since 1900-01-01 00:00:00.0").unwrap();
        assert_eq!(units.decode(24.0).unwrap(), ymd_hms(1900, 1, 2, 0));

        let units = TimeUnits::parse("seconds since 1970-01-01").unwrap();
        assert_eq!(units.decode(3600.0).unwrap(), ymd_hms(1970, 1, 1, 1));

        let units = TimeUnits::parse("days since 2000-01-01T00:00:00Z").unwrap();
        assert_eq!(units.encode(ymd_hms(2000, 1, 3, 12)), 2.5);
    }

    #[test]
    fn test_parse_errors() {
        assert!(TimeUnits::parse("hours").is_err());
        assert!(TimeUnits::parse("fortnights since 2000-01-01").is_err());
        assert!(TimeUnits::parse("days since yesterday").is_err());
    }

    #[test]
    fn test_decode_axis_calendar() {
        let values = [0.0, 1.0];
        assert!(decode_axis(&values, Some("days since 2000-01-01"), Some("noleap")).is_err());
        assert!(decode_axis(&values, None, None).is_err());
        let times = decode_axis(&values, Some("days since 2000-01-01"), Some("proleptic_gregorian")).unwrap();
        assert_eq!(times[1], ymd_hms(2000, 1, 2, 0));
    }

    #[test]
    fn test_date_days_roundtrip() {
        let date = NaiveDate::from_ymd_opt(2020, 2, 29).unwrap();
        assert_eq!(days_to_date(date_to_days(date)).unwrap(), date);
        assert_eq!(date_to_days(NaiveDate::from_ymd_opt(1970, 1, 2).unwrap()), 1.0);
    }
}
