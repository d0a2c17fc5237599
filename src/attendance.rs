use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::calendar::Calendar;
use crate::model::{AttendanceStatus, FlowerOffering};

/// Half-up rounding to one decimal place.
pub fn round_1_decimal(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

/// Present days as a percentage of all recorded days; 0 with no records.
pub fn attendance_rate(present: u32, total: u32) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round_1_decimal(100.0 * f64::from(present) / f64::from(total))
}

#[derive(Debug, Clone)]
pub struct RecordedMark {
    pub student_id: String,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    pub flower_brought: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSummary {
    pub present: u32,
    pub absent: u32,
    pub late: u32,
    pub total: u32,
    pub attendance_rate: f64,
    pub flower_offerings: u32,
}

impl AttendanceSummary {
    fn add(&mut self, mark: &RecordedMark) {
        match mark.status {
            AttendanceStatus::Present => self.present += 1,
            AttendanceStatus::Absent => self.absent += 1,
            AttendanceStatus::Late => self.late += 1,
        }
        if mark.flower_brought {
            self.flower_offerings += 1;
        }
        self.total = self.present + self.absent + self.late;
        self.attendance_rate = attendance_rate(self.present, self.total);
    }
}

pub fn summarize<'a, I>(marks: I) -> AttendanceSummary
where
    I: IntoIterator<Item = &'a RecordedMark>,
{
    let mut s = AttendanceSummary::default();
    for m in marks {
        s.add(m);
    }
    s
}

/// Records partitioned by student, then by status; dates ascending.
pub fn group_by_student(
    marks: &[RecordedMark],
) -> BTreeMap<&str, BTreeMap<AttendanceStatus, Vec<NaiveDate>>> {
    let mut out: BTreeMap<&str, BTreeMap<AttendanceStatus, Vec<NaiveDate>>> = BTreeMap::new();
    for m in marks {
        out.entry(m.student_id.as_str())
            .or_default()
            .entry(m.status)
            .or_default()
            .push(m.date);
    }
    for by_status in out.values_mut() {
        for dates in by_status.values_mut() {
            dates.sort();
        }
    }
    out
}

/// One summary per roster entry, in roster order. Students without records
/// get an all-zero summary; records for students off the roster are ignored.
pub fn summarize_roster(
    roster: &[String],
    marks: &[RecordedMark],
) -> Vec<(String, AttendanceSummary)> {
    let mut by_student: BTreeMap<&str, AttendanceSummary> = BTreeMap::new();
    for m in marks {
        by_student.entry(m.student_id.as_str()).or_default().add(m);
    }
    roster
        .iter()
        .map(|id| {
            let s = by_student.get(id.as_str()).copied().unwrap_or_default();
            (id.clone(), s)
        })
        .collect()
}

/// A row of the marking sheet before it is saved.
#[derive(Debug, Clone, Default)]
pub struct PendingMark {
    pub student_id: String,
    pub status: Option<AttendanceStatus>,
    pub reason: Option<String>,
    pub flower_offering: Option<FlowerOffering>,
}

impl PendingMark {
    pub fn new(student_id: impl Into<String>) -> Self {
        Self {
            student_id: student_id.into(),
            ..Self::default()
        }
    }
}

/// "Mark all present/absent/late".
pub fn bulk_assign(sheet: &mut [PendingMark], status: AttendanceStatus) {
    for row in sheet.iter_mut() {
        row.status = Some(status);
    }
}

/// True when marking `date` needs explicit confirmation: it is neither a
/// Sunday nor a Poya day.
pub fn needs_confirmation(calendar: &Calendar, date: NaiveDate, recorded_poya: bool) -> bool {
    !calendar.is_class_day(date, recorded_poya)
}
