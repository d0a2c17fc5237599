use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Field-level validation failure raised at the data-model boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    #[error("{field} is required")]
    Missing { field: &'static str },

    #[error("{field}: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}

impl ModelError {
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        ModelError::Invalid {
            field,
            message: message.into(),
        }
    }

    pub fn field(&self) -> &'static str {
        match self {
            ModelError::Missing { field } | ModelError::Invalid { field, .. } => field,
        }
    }
}

pub fn parse_date(field: &'static str, raw: &str) -> Result<NaiveDate, ModelError> {
    let t = raw.trim();
    if t.is_empty() {
        return Err(ModelError::Missing { field });
    }
    NaiveDate::parse_from_str(t, DATE_FORMAT)
        .map_err(|_| ModelError::invalid(field, format!("expected YYYY-MM-DD, got {t:?}")))
}

pub fn format_date(d: NaiveDate) -> String {
    d.format(DATE_FORMAT).to_string()
}

/// An English/Sinhala text pair. English is mandatory; Sinhala falls back to
/// the English text when it is not supplied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bilingual {
    pub en: String,
    pub si: String,
}

impl Bilingual {
    pub fn new(field: &'static str, en: &str, si: Option<&str>) -> Result<Self, ModelError> {
        let en = en.trim();
        if en.is_empty() {
            return Err(ModelError::Missing { field });
        }
        let si = si.map(str::trim).filter(|s| !s.is_empty()).unwrap_or(en);
        Ok(Self {
            en: en.to_string(),
            si: si.to_string(),
        })
    }

    /// Accepts either `{ "en": .., "si": .. }` or a bare string.
    pub fn from_json(
        field: &'static str,
        v: Option<&serde_json::Value>,
    ) -> Result<Self, ModelError> {
        match v {
            None | Some(serde_json::Value::Null) => Err(ModelError::Missing { field }),
            Some(serde_json::Value::String(s)) => Self::new(field, s, None),
            Some(serde_json::Value::Object(map)) => {
                let en = map.get("en").and_then(|v| v.as_str()).unwrap_or("");
                let si = map.get("si").and_then(|v| v.as_str());
                Self::new(field, en, si)
            }
            Some(_) => Err(ModelError::invalid(
                field,
                "must be a string or an {en, si} object",
            )),
        }
    }

    pub fn empty() -> Self {
        Self {
            en: String::new(),
            si: String::new(),
        }
    }
}

/// Student registration number, `BSP_YY_NNNN`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct StudentId(String);

impl StudentId {
    pub fn new(year: i32, sequence: u32) -> Result<Self, ModelError> {
        if !(1..=9999).contains(&sequence) {
            return Err(ModelError::invalid(
                "studentId",
                format!("sequence {sequence} out of range 1..=9999"),
            ));
        }
        let yy = year.rem_euclid(100);
        Ok(Self(format!("BSP_{yy:02}_{sequence:04}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn sequence(&self) -> u32 {
        self.0[7..11].parse().unwrap_or(0)
    }
}

impl FromStr for StudentId {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim();
        if t.is_empty() {
            return Err(ModelError::Missing { field: "studentId" });
        }
        let b = t.as_bytes();
        let well_formed = b.len() == 11
            && &b[..4] == b"BSP_"
            && b[4..6].iter().all(u8::is_ascii_digit)
            && b[6] == b'_'
            && b[7..].iter().all(u8::is_ascii_digit);
        if !well_formed {
            return Err(ModelError::invalid(
                "studentId",
                format!("{t:?} does not match BSP_YY_NNNN"),
            ));
        }
        Ok(Self(t.to_string()))
    }
}

impl fmt::Display for StudentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AgeGroup {
    #[serde(rename = "3-6")]
    Early,
    #[serde(rename = "7-10")]
    Junior,
    #[serde(rename = "11-14")]
    Middle,
    #[serde(rename = "15-17")]
    Senior,
}

impl AgeGroup {
    pub const ALL: [AgeGroup; 4] = [
        AgeGroup::Early,
        AgeGroup::Junior,
        AgeGroup::Middle,
        AgeGroup::Senior,
    ];

    pub fn bounds(self) -> (u32, u32) {
        match self {
            AgeGroup::Early => (3, 6),
            AgeGroup::Junior => (7, 10),
            AgeGroup::Middle => (11, 14),
            AgeGroup::Senior => (15, 17),
        }
    }

    pub fn for_age(age: u32) -> Result<Self, ModelError> {
        Self::ALL
            .into_iter()
            .find(|g| {
                let (lo, hi) = g.bounds();
                (lo..=hi).contains(&age)
            })
            .ok_or_else(|| {
                ModelError::invalid(
                    "dateOfBirth",
                    format!("age {age} is outside the enrolment range 3-17"),
                )
            })
    }

    pub fn class_code(self) -> ClassCode {
        match self {
            AgeGroup::Early => ClassCode::Adh,
            AgeGroup::Junior => ClassCode::Met,
            AgeGroup::Middle => ClassCode::Kha,
            AgeGroup::Senior => ClassCode::Nek,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AgeGroup::Early => "3-6",
            AgeGroup::Junior => "7-10",
            AgeGroup::Middle => "11-14",
            AgeGroup::Senior => "15-17",
        }
    }
}

impl FromStr for AgeGroup {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|g| g.as_str() == s.trim())
            .ok_or_else(|| {
                ModelError::invalid("ageGroup", format!("unknown age group {s:?}"))
            })
    }
}

/// Class cohort, one per age bracket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ClassCode {
    Adh,
    Met,
    Kha,
    Nek,
}

impl ClassCode {
    pub fn age_group(self) -> AgeGroup {
        match self {
            ClassCode::Adh => AgeGroup::Early,
            ClassCode::Met => AgeGroup::Junior,
            ClassCode::Kha => AgeGroup::Middle,
            ClassCode::Nek => AgeGroup::Senior,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ClassCode::Adh => "ADH",
            ClassCode::Met => "MET",
            ClassCode::Kha => "KHA",
            ClassCode::Nek => "NEK",
        }
    }
}

impl FromStr for ClassCode {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ADH" => Ok(ClassCode::Adh),
            "MET" => Ok(ClassCode::Met),
            "KHA" => Ok(ClassCode::Kha),
            "NEK" => Ok(ClassCode::Nek),
            _ => Err(ModelError::invalid(
                "classCode",
                format!("unknown class code {s:?}"),
            )),
        }
    }
}

/// Completed years between `dob` and `today`.
pub fn age_on(dob: NaiveDate, today: NaiveDate) -> Result<u32, ModelError> {
    if dob > today {
        return Err(ModelError::invalid("dateOfBirth", "is in the future"));
    }
    let mut years = today.year() - dob.year();
    if (today.month(), today.day()) < (dob.month(), dob.day()) {
        years -= 1;
    }
    Ok(years.max(0) as u32)
}

/// Age, bracket and class cohort for a date of birth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub age: u32,
    pub age_group: AgeGroup,
    pub class_code: ClassCode,
}

pub fn placement_for(dob: NaiveDate, today: NaiveDate) -> Result<Placement, ModelError> {
    let age = age_on(dob, today)?;
    let age_group = AgeGroup::for_age(age)?;
    Ok(Placement {
        age,
        age_group,
        class_code: age_group.class_code(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Late => "late",
        }
    }
}

impl FromStr for AttendanceStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "present" => Ok(AttendanceStatus::Present),
            "absent" => Ok(AttendanceStatus::Absent),
            "late" => Ok(AttendanceStatus::Late),
            other => Err(ModelError::invalid(
                "status",
                format!("expected present, absent or late, got {other:?}"),
            )),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowerOffering {
    pub brought: bool,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CalendarEventType {
    Holiday,
    Poya,
    FlowerOffering,
    Special,
}

impl CalendarEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            CalendarEventType::Holiday => "holiday",
            CalendarEventType::Poya => "poya",
            CalendarEventType::FlowerOffering => "flowerOffering",
            CalendarEventType::Special => "special",
        }
    }
}

impl FromStr for CalendarEventType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "holiday" => Ok(CalendarEventType::Holiday),
            "poya" => Ok(CalendarEventType::Poya),
            "flowerOffering" => Ok(CalendarEventType::FlowerOffering),
            "special" => Ok(CalendarEventType::Special),
            other => Err(ModelError::invalid(
                "type",
                format!("unknown event type {other:?}"),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExamType {
    Written,
    Oral,
    Combined,
}

impl ExamType {
    pub fn as_str(self) -> &'static str {
        match self {
            ExamType::Written => "written",
            ExamType::Oral => "oral",
            ExamType::Combined => "combined",
        }
    }
}

impl FromStr for ExamType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "written" => Ok(ExamType::Written),
            "oral" => Ok(ExamType::Oral),
            "combined" => Ok(ExamType::Combined),
            other => Err(ModelError::invalid(
                "type",
                format!("expected written, oral or combined, got {other:?}"),
            )),
        }
    }
}
