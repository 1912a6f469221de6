use chrono::{DateTime, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::EsgfError;

/// Time resolution encoded by the width of a filename date token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Annual,
    Monthly,
    Daily,
    SubDaily,
}

impl Resolution {
    fn width(self) -> usize {
        match self {
            Resolution::Annual => 4,
            Resolution::Monthly => 6,
            Resolution::Daily => 8,
            Resolution::SubDaily => 12,
        }
    }
}

// Widest first, so a 12-digit token is never read as an 8-digit prefix.
static PATTERNS: Lazy<Vec<(Resolution, Regex)>> = Lazy::new(|| {
    [
        Resolution::SubDaily,
        Resolution::Daily,
        Resolution::Monthly,
        Resolution::Annual,
    ]
    .into_iter()
    .map(|resolution| {
        let width = resolution.width();
        let pattern = format!(r"_(\d{{{width}}})-(\d{{{width}}})(?:\.[^._]+)+$");
        let regex = Regex::new(&pattern).expect("date token pattern is valid");
        (resolution, regex)
    })
    .collect()
});

/// Start and end of the period covered by a single data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub resolution: Resolution,
}

impl DateRange {
    /// Parses the trailing `START-END` token of a CMIP filename such as
    /// `tas_Amon_CESM2-WACCM_ssp126_r1i1p1f1_gn_201501-210012.nc`.
    pub fn from_filename(filename: &str) -> Result<Self, EsgfError> {
        for (resolution, regex) in PATTERNS.iter() {
            let Some(captures) = regex.captures(filename) else {
                continue;
            };
            let start = parse_token(&captures[1], *resolution)
                .ok_or_else(|| EsgfError::DateParse(filename.to_string()))?;
            let end = parse_token(&captures[2], *resolution)
                .ok_or_else(|| EsgfError::DateParse(filename.to_string()))?;
            return Ok(Self {
                start,
                end,
                resolution: *resolution,
            });
        }
        Err(EsgfError::DateParse(filename.to_string()))
    }
}

fn parse_token(token: &str, resolution: Resolution) -> Option<NaiveDateTime> {
    let field = |range: std::ops::Range<usize>| token.get(range)?.parse::<u32>().ok();
    let year = token.get(0..4)?.parse::<i32>().ok()?;
    let (month, day, hour, minute) = match resolution {
        Resolution::Annual => (1, 1, 0, 0),
        Resolution::Monthly => (field(4..6)?, 1, 0, 0),
        Resolution::Daily => (field(4..6)?, field(6..8)?, 0, 0),
        Resolution::SubDaily => (field(4..6)?, field(6..8)?, field(8..10)?, field(10..12)?),
    };
    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, 0)
}

/// Parses an end date declared in catalog metadata (`datetime_stop`).
pub fn parse_declared_date(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.naive_utc());
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
        return Some(parsed);
    }
    value
        .get(0..10)
        .and_then(|date| NaiveDate::parse_from_str(date, "%Y-%m-%d").ok())
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::{Datelike, Timelike};

    use super::*;

    #[test]
    fn monthly_range() {
        let range =
            DateRange::from_filename("tas_Amon_CESM2-WACCM_ssp126_r1i1p1f1_gn_201501-210012.nc")
                .unwrap();
        assert_eq!(range.resolution, Resolution::Monthly);
        assert_eq!((range.start.year(), range.start.month()), (2015, 1));
        assert_eq!((range.end.year(), range.end.month()), (2100, 12));
    }

    #[test]
    fn sub_daily_is_not_read_as_daily() {
        let range =
            DateRange::from_filename("pr_3hr_MRI-ESM2-0_ssp585_r1i1p1f1_gn_201501010130-201912312230.nc")
                .unwrap();
        assert_eq!(range.resolution, Resolution::SubDaily);
        assert_eq!(range.end.hour(), 22);
        assert_eq!(range.end.minute(), 30);
    }

    #[test]
    fn annual_and_daily() {
        let annual = DateRange::from_filename("x_Oyr_M_e_r1_gn_1850-2014.nc").unwrap();
        assert_eq!(annual.resolution, Resolution::Annual);
        let daily = DateRange::from_filename("x_day_M_e_r1_gn_20150101-20241231.nc").unwrap();
        assert_eq!(daily.resolution, Resolution::Daily);
        assert_eq!(daily.end.day(), 31);
    }

    #[test]
    fn parsing_is_repeatable() {
        let name = "so_Omon_CanESM5_ssp126_r1i1p1f1_gn_201501-210012.nc";
        assert_eq!(
            DateRange::from_filename(name).unwrap(),
            DateRange::from_filename(name).unwrap()
        );
    }

    #[test]
    fn unrecognised_token_names_the_file() {
        let err = DateRange::from_filename("areacella_fx_CESM2_ssp126_r1i1p1f1_gn.nc").unwrap_err();
        assert_matches!(err, EsgfError::DateParse(name) if name.starts_with("areacella"));

        let err = DateRange::from_filename("x_Amon_M_e_r1_gn_201513-210012.nc").unwrap_err();
        assert_matches!(err, EsgfError::DateParse(_));
    }

    #[test]
    fn declared_dates() {
        let parsed = parse_declared_date("2300-12-16T12:00:00Z").unwrap();
        assert_eq!(parsed.year(), 2300);
        let parsed = parse_declared_date("2150-12-31").unwrap();
        assert_eq!(parsed.year(), 2150);
        assert!(parse_declared_date("n/a").is_none());
    }
}
