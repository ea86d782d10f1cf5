//! Time range parsing and filtering.
//!
//! A time specification is either a single timestamp or `<start> to <end>`.
//! Timestamps follow ISO-8601 and may be partial (`2016`, `2016-09`,
//! `2016-09-02T22:15`); missing components are completed with their minimum,
//! which makes `2016 to 2017` the half-open interval covering exactly the
//! year 2016. A single timestamp queries the instant `[t, t]`.

use crate::error::FrevaRestError;

use chrono::NaiveDateTime;

/// How a document's time interval is matched against the query interval.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum TimeSelect {
    /// The document interval intersects the query interval.
    #[default]
    Flexible,
    /// The document interval is contained within the query interval.
    Strict,
    /// The query interval is contained within one single file.
    File,
}

impl TimeSelect {
    pub fn from_param(value: &str) -> Result<Self, FrevaRestError> {
        match value {
            "flexible" => Ok(TimeSelect::Flexible),
            "strict" => Ok(TimeSelect::Strict),
            "file" => Ok(TimeSelect::File),
            other => Err(FrevaRestError::InvalidInput(format!(
                "choose time_select from flexible, strict, file; got: {other}"
            ))),
        }
    }

    /// The range-field operator implementing this selection method.
    fn operator(&self) -> &'static str {
        match self {
            TimeSelect::Flexible => "Intersects",
            TimeSelect::Strict => "Within",
            TimeSelect::File => "Contains",
        }
    }
}

/// A parsed query time range.
#[derive(Clone, Debug, PartialEq)]
pub struct TimeRange {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    /// A single timestamp queries the instant `[t, t]`; ranges are half-open
    /// `[start, end)`.
    pub instant: bool,
}

impl TimeRange {
    /// Render the range as a filter on the index's `time` range field.
    pub fn to_filter(&self, select: TimeSelect) -> String {
        let start = self.start.format("%Y-%m-%dT%H:%M:%SZ");
        if self.instant {
            format!(
                "{{!field f=time op={}}}[{start} TO {start}]",
                select.operator()
            )
        } else {
            let end = self.end.format("%Y-%m-%dT%H:%M:%SZ");
            format!(
                "{{!field f=time op={}}}[{start} TO {end}}}",
                select.operator()
            )
        }
    }
}

/// Earliest timestamp the index understands.
fn min_timestamp() -> NaiveDateTime {
    chrono::NaiveDate::from_ymd_opt(1, 1, 1)
        .expect("constant date is valid")
        .and_hms_opt(0, 0, 0)
        .expect("constant time is valid")
}

/// Latest timestamp the index understands.
fn max_timestamp() -> NaiveDateTime {
    chrono::NaiveDate::from_ymd_opt(9999, 12, 31)
        .expect("constant date is valid")
        .and_hms_opt(23, 59, 59)
        .expect("constant time is valid")
}

/// Parse a time specification; `None` when the spec is empty.
pub fn parse_time_spec(spec: &str) -> Result<Option<TimeRange>, FrevaRestError> {
    let compact: String = spec.split_whitespace().collect::<Vec<_>>().join("");
    if compact.is_empty() {
        return Ok(None);
    }
    let compact = compact.to_lowercase();
    match compact.split_once("to") {
        Some((start, end)) => {
            let start = if start.is_empty() {
                min_timestamp()
            } else {
                parse_partial(start)?
            };
            let end = if end.is_empty() {
                max_timestamp()
            } else {
                parse_partial(end)?
            };
            if end < start {
                return Err(FrevaRestError::InvalidInput(format!(
                    "time range end precedes start: {spec}"
                )));
            }
            Ok(Some(TimeRange {
                start,
                end,
                instant: false,
            }))
        }
        None => {
            let instant = parse_partial(&compact)?;
            Ok(Some(TimeRange {
                start: instant,
                end: instant,
                instant: true,
            }))
        }
    }
}

/// Parse a possibly partial ISO-8601 timestamp, completing missing
/// components with their minimum.
fn parse_partial(value: &str) -> Result<NaiveDateTime, FrevaRestError> {
    let invalid =
        || FrevaRestError::InvalidInput(format!("could not parse timestamp: {value}"));
    let value = value.trim_end_matches('z');
    let (date_part, time_part) = match value.split_once('t') {
        Some((date, time)) => (date, Some(time)),
        None => (value, None),
    };

    let mut date_fields = date_part.splitn(3, '-');
    let year: i32 = date_fields
        .next()
        .filter(|y| !y.is_empty())
        .ok_or_else(invalid)?
        .parse()
        .map_err(|_| invalid())?;
    let month: u32 = match date_fields.next() {
        Some(m) => m.parse().map_err(|_| invalid())?,
        None => 1,
    };
    let day: u32 = match date_fields.next() {
        Some(d) => d.parse().map_err(|_| invalid())?,
        None => 1,
    };

    let (hour, minute, second) = match time_part {
        Some(time) => {
            let mut time_fields = time.splitn(3, ':');
            let hour: u32 = match time_fields.next().filter(|h| !h.is_empty()) {
                Some(h) => h.parse().map_err(|_| invalid())?,
                None => 0,
            };
            let minute: u32 = match time_fields.next() {
                Some(m) => m.parse().map_err(|_| invalid())?,
                None => 0,
            };
            let second: u32 = match time_fields.next() {
                Some(s) => s.parse().map_err(|_| invalid())?,
                None => 0,
            };
            (hour, minute, second)
        }
        None => (0, 0, 0),
    };

    chrono::NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_opt(hour, minute, second))
        .ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").unwrap()
    }

    #[test]
    fn empty_spec_is_no_filter() {
        assert_eq!(parse_time_spec("").unwrap(), None);
        assert_eq!(parse_time_spec("   ").unwrap(), None);
    }

    #[test]
    fn partial_timestamps_complete_with_minimums() {
        assert_eq!(parse_partial("2016").unwrap(), ts("2016-01-01T00:00:00"));
        assert_eq!(parse_partial("2016-10").unwrap(), ts("2016-10-01T00:00:00"));
        assert_eq!(
            parse_partial("2016-09-02t22:15").unwrap(),
            ts("2016-09-02T22:15:00")
        );
        assert_eq!(
            parse_partial("2016-09-02t22:15:31z").unwrap(),
            ts("2016-09-02T22:15:31")
        );
    }

    #[test]
    fn range_is_half_open() {
        let range = parse_time_spec("2016-09-02T22:15 to 2016-10")
            .unwrap()
            .unwrap();
        assert_eq!(range.start, ts("2016-09-02T22:15:00"));
        assert_eq!(range.end, ts("2016-10-01T00:00:00"));
        assert!(!range.instant);
        assert_eq!(
            range.to_filter(TimeSelect::Strict),
            "{!field f=time op=Within}[2016-09-02T22:15:00Z TO 2016-10-01T00:00:00Z}"
        );
    }

    #[test]
    fn single_timestamp_is_instantaneous() {
        let range = parse_time_spec("2000-02-01").unwrap().unwrap();
        assert!(range.instant);
        assert_eq!(
            range.to_filter(TimeSelect::Flexible),
            "{!field f=time op=Intersects}[2000-02-01T00:00:00Z TO 2000-02-01T00:00:00Z]"
        );
    }

    #[test]
    fn open_ended_ranges() {
        let range = parse_time_spec("2016 to").unwrap().unwrap();
        assert_eq!(range.start, ts("2016-01-01T00:00:00"));
        assert_eq!(range.end, max_timestamp());
        let range = parse_time_spec("to 2016").unwrap().unwrap();
        assert_eq!(range.start, min_timestamp());
        assert_eq!(range.end, ts("2016-01-01T00:00:00"));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse_time_spec("around noon").is_err());
        assert!(parse_time_spec("2020-13").is_err());
        assert!(parse_time_spec("2021 to 2020").is_err());
    }

    #[test]
    fn select_method_validation() {
        assert_eq!(TimeSelect::from_param("strict").unwrap(), TimeSelect::Strict);
        assert!(TimeSelect::from_param("fuzzy").is_err());
    }
}
