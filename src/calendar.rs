//! Holiday table, approximate Poya days and date classification.
//!
//! Poya days here are an approximation: a fixed January anchor stepped forward
//! by the mean synodic month. No lunar ephemeris is consulted, so individual
//! dates can be a day or two away from the observed full moon.

use anyhow::{anyhow, Context};
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use crate::model::{format_date, parse_date};

pub const SYNODIC_MONTH_DAYS: f64 = 29.53059;
pub const MAX_POYA_STEPS: u32 = 13;

const STATIC_HOLIDAYS: &[(u32, u32, &str)] = &[
    (1, 1, "New Year's Day"),
    (2, 4, "National Day"),
    (4, 13, "Sinhala and Tamil New Year's Eve"),
    (4, 14, "Sinhala and Tamil New Year"),
    (5, 1, "May Day"),
    (12, 25, "Christmas Day"),
];

pub fn static_holidays(year: i32) -> Vec<NaiveDate> {
    STATIC_HOLIDAYS
        .iter()
        .filter_map(|&(m, d, _)| NaiveDate::from_ymd_opt(year, m, d))
        .collect()
}

pub fn static_holiday_name(date: NaiveDate) -> Option<&'static str> {
    STATIC_HOLIDAYS
        .iter()
        .find(|&&(m, d, _)| date.month() == m && date.day() == d)
        .map(|&(_, _, name)| name)
}

/// Month/day of the first projected full moon in a year.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoyaAnchor {
    pub month: u32,
    pub day: u32,
}

impl Default for PoyaAnchor {
    fn default() -> Self {
        Self { month: 1, day: 25 }
    }
}

impl PoyaAnchor {
    pub fn date_in(self, year: i32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(year, self.month, self.day)
    }

    /// Valid in every year, i.e. not Feb 29 and a real calendar day.
    pub fn is_valid(self) -> bool {
        NaiveDate::from_ymd_opt(2001, self.month, self.day).is_some()
    }
}

/// Approximate Poya days for `year`: the anchor, then `round(i * 29.53059)`
/// days after it, stopping after 13 steps or once a date leaves the year.
pub fn poya_days(year: i32, anchor: PoyaAnchor) -> Vec<NaiveDate> {
    let Some(start) = anchor.date_in(year) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for i in 0..MAX_POYA_STEPS {
        let offset = (f64::from(i) * SYNODIC_MONTH_DAYS).round() as i64;
        let Some(date) = start.checked_add_signed(Duration::days(offset)) else {
            break;
        };
        if date.year() != year {
            break;
        }
        out.push(date);
    }
    out
}

/// Somewhere holiday dates can be loaded from.
pub trait HolidaySource {
    fn name(&self) -> &str;
    fn fetch(&self, year: i32) -> anyhow::Result<Vec<NaiveDate>>;
}

pub struct StaticHolidays;

impl HolidaySource for StaticHolidays {
    fn name(&self) -> &str {
        "static"
    }

    fn fetch(&self, year: i32) -> anyhow::Result<Vec<NaiveDate>> {
        Ok(static_holidays(year))
    }
}

/// Holiday lists keyed by year, e.g. `{ "2025": ["2025-01-01", ...] }`.
pub struct JsonFileHolidays {
    path: PathBuf,
}

impl JsonFileHolidays {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl HolidaySource for JsonFileHolidays {
    fn name(&self) -> &str {
        "file"
    }

    fn fetch(&self, year: i32) -> anyhow::Result<Vec<NaiveDate>> {
        let text = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.to_string_lossy()))?;
        let by_year: HashMap<String, Vec<String>> =
            serde_json::from_str(&text).context("holiday file is not a year -> dates map")?;
        let raw = by_year
            .get(&year.to_string())
            .ok_or_else(|| anyhow!("no holidays listed for {year}"))?;
        let mut dates = Vec::with_capacity(raw.len());
        for s in raw {
            let d = parse_date("holidays", s)?;
            if d.year() != year {
                return Err(anyhow!("holiday {s} listed under {year}"));
            }
            dates.push(d);
        }
        dates.sort();
        dates.dedup();
        Ok(dates)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DayKind {
    Holiday,
    Poya,
    Ordinary,
}

/// One year's holiday and Poya sets.
#[derive(Debug, Clone)]
pub struct Calendar {
    year: i32,
    source: String,
    holidays: BTreeSet<NaiveDate>,
    poya: BTreeSet<NaiveDate>,
}

impl Calendar {
    /// Loads holidays from `source`, falling back to the static table when
    /// the source fails. The failure is logged, never returned.
    pub fn load(year: i32, source: &dyn HolidaySource, anchor: PoyaAnchor) -> Self {
        let (holidays, source_name) = match source.fetch(year) {
            Ok(v) => (v, source.name().to_string()),
            Err(e) => {
                let reason = format!("{e:#}");
                tracing::warn!(
                    year,
                    source = source.name(),
                    error = %reason,
                    "holiday source unavailable, using static table"
                );
                (static_holidays(year), StaticHolidays.name().to_string())
            }
        };
        Self {
            year,
            source: source_name,
            holidays: holidays.into_iter().collect(),
            poya: poya_days(year, anchor).into_iter().collect(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn holidays(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.holidays.iter().copied()
    }

    pub fn poya_days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.poya.iter().copied()
    }

    pub fn classify(&self, date: NaiveDate) -> DayKind {
        if self.holidays.contains(&date) {
            DayKind::Holiday
        } else if self.poya.contains(&date) {
            DayKind::Poya
        } else {
            DayKind::Ordinary
        }
    }

    pub fn is_poya(&self, date: NaiveDate) -> bool {
        self.poya.contains(&date)
    }

    /// Classes run on Sundays and Poya days. `recorded_poya` covers Poya
    /// events entered by hand that the approximation misses.
    pub fn is_class_day(&self, date: NaiveDate, recorded_poya: bool) -> bool {
        date.weekday() == Weekday::Sun || recorded_poya || self.is_poya(date)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "year": self.year,
            "source": self.source,
            "holidays": self.holidays().map(format_date).collect::<Vec<_>>(),
            "poyaDays": self.poya_days().map(format_date).collect::<Vec<_>>(),
            "poyaApproximation": true,
        })
    }
}
