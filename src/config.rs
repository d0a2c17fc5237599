use anyhow::{anyhow, Context};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::calendar::{HolidaySource, JsonFileHolidays, PoyaAnchor, StaticHolidays};

pub const CONFIG_FILE: &str = "sathipasala.toml";

/// Per-workspace settings read from `sathipasala.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub calendar: CalendarConfig,
    pub attendance: AttendanceConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CalendarConfig {
    pub poya_anchor_month: u32,
    pub poya_anchor_day: u32,
    /// JSON holiday list, relative to the workspace unless absolute.
    pub holiday_source: Option<PathBuf>,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        let anchor = PoyaAnchor::default();
        Self {
            poya_anchor_month: anchor.month,
            poya_anchor_day: anchor.day,
            holiday_source: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AttendanceConfig {
    pub require_class_day_confirmation: bool,
}

impl Default for AttendanceConfig {
    fn default() -> Self {
        Self {
            require_class_day_confirmation: true,
        }
    }
}

impl Config {
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let cfg: Config = toml::from_str(text).context("invalid sathipasala.toml")?;
        if !cfg.poya_anchor().is_valid() {
            return Err(anyhow!(
                "calendar.poya_anchor_month/day {}/{} is not a date in every year",
                cfg.calendar.poya_anchor_month,
                cfg.calendar.poya_anchor_day
            ));
        }
        Ok(cfg)
    }

    /// Missing file means defaults.
    pub fn load(workspace: &Path) -> anyhow::Result<Self> {
        let path = workspace.join(CONFIG_FILE);
        if !path.is_file() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.to_string_lossy()))?;
        Self::parse(&text)
    }

    pub fn poya_anchor(&self) -> PoyaAnchor {
        PoyaAnchor {
            month: self.calendar.poya_anchor_month,
            day: self.calendar.poya_anchor_day,
        }
    }

    pub fn holiday_source(&self, workspace: Option<&Path>) -> Box<dyn HolidaySource> {
        match (&self.calendar.holiday_source, workspace) {
            (Some(p), _) if p.is_absolute() => Box::new(JsonFileHolidays::new(p)),
            (Some(p), Some(ws)) => Box::new(JsonFileHolidays::new(ws.join(p))),
            _ => Box::new(StaticHolidays),
        }
    }
}
