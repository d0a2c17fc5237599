use serde::Serialize;

use crate::model::{ExamType, ModelError};

/// Scoring rules carried by an exam.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExamRules {
    pub exam_type: ExamType,
    pub max_score: f64,
    pub pass_mark: f64,
}

impl ExamRules {
    pub fn new(exam_type: ExamType, max_score: f64, pass_mark: f64) -> Result<Self, ModelError> {
        if !max_score.is_finite() || max_score <= 0.0 {
            return Err(ModelError::invalid("maxScore", "must be greater than 0"));
        }
        if !pass_mark.is_finite() || pass_mark < 0.0 || pass_mark > max_score {
            return Err(ModelError::invalid(
                "passMark",
                format!("must be between 0 and {max_score}"),
            ));
        }
        Ok(Self {
            exam_type,
            max_score,
            pass_mark,
        })
    }

    fn check_component(
        &self,
        field: &'static str,
        v: Option<f64>,
    ) -> Result<Option<f64>, ModelError> {
        match v {
            Some(x) if !x.is_finite() || x < 0.0 || x > self.max_score => Err(
                ModelError::invalid(field, format!("must be between 0 and {}", self.max_score)),
            ),
            other => Ok(other),
        }
    }

    /// Written-only and oral-only exams take that component as the total;
    /// combined exams average the two.
    pub fn total_score(&self, written: Option<f64>, oral: Option<f64>) -> Result<f64, ModelError> {
        let written = self.check_component("writtenScore", written)?;
        let oral = self.check_component("oralScore", oral)?;
        match self.exam_type {
            ExamType::Written => written.ok_or(ModelError::Missing {
                field: "writtenScore",
            }),
            ExamType::Oral => oral.ok_or(ModelError::Missing { field: "oralScore" }),
            ExamType::Combined => {
                let w = written.ok_or(ModelError::Missing {
                    field: "writtenScore",
                })?;
                let o = oral.ok_or(ModelError::Missing { field: "oralScore" })?;
                Ok((w + o) / 2.0)
            }
        }
    }

    pub fn passed(&self, total: f64) -> bool {
        total >= self.pass_mark
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultStats {
    pub count: usize,
    pub passed: usize,
    pub average: f64,
    pub highest: Option<f64>,
    pub lowest: Option<f64>,
}

pub fn result_stats(rules: &ExamRules, totals: &[f64]) -> ResultStats {
    if totals.is_empty() {
        return ResultStats::default();
    }
    let sum: f64 = totals.iter().sum();
    ResultStats {
        count: totals.len(),
        passed: totals.iter().filter(|t| rules.passed(**t)).count(),
        average: crate::attendance::round_1_decimal(sum / totals.len() as f64),
        highest: totals.iter().copied().reduce(f64::max),
        lowest: totals.iter().copied().reduce(f64::min),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rules_validate_limits() {
        assert!(ExamRules::new(ExamType::Written, 0.0, 0.0).is_err());
        assert_eq!(
            ExamRules::new(ExamType::Written, 100.0, 120.0)
                .expect_err("pass mark above max")
                .field(),
            "passMark"
        );
        assert!(ExamRules::new(ExamType::Oral, 50.0, 25.0).is_ok());
    }

    #[test]
    fn total_follows_exam_type() {
        let written = ExamRules::new(ExamType::Written, 100.0, 40.0).expect("rules");
        assert_eq!(written.total_score(Some(72.0), Some(10.0)).expect("total"), 72.0);
        assert_eq!(
            written.total_score(None, Some(10.0)),
            Err(ModelError::Missing { field: "writtenScore" })
        );

        let oral = ExamRules::new(ExamType::Oral, 100.0, 40.0).expect("rules");
        assert_eq!(oral.total_score(None, Some(55.0)).expect("total"), 55.0);

        let combined = ExamRules::new(ExamType::Combined, 100.0, 40.0).expect("rules");
        assert_eq!(combined.total_score(Some(70.0), Some(81.0)).expect("total"), 75.5);
        assert!(combined.total_score(Some(70.0), None).is_err());
    }

    #[test]
    fn components_must_be_within_max() {
        let rules = ExamRules::new(ExamType::Combined, 50.0, 20.0).expect("rules");
        assert_eq!(
            rules
                .total_score(Some(51.0), Some(10.0))
                .expect_err("over max")
                .field(),
            "writtenScore"
        );
        assert!(rules.total_score(Some(10.0), Some(-1.0)).is_err());
        assert!(rules.total_score(Some(f64::NAN), Some(1.0)).is_err());
    }

    #[test]
    fn stats_count_passes() {
        let rules = ExamRules::new(ExamType::Written, 100.0, 50.0).expect("rules");
        let s = result_stats(&rules, &[40.0, 50.0, 95.0]);
        assert_eq!(s.count, 3);
        assert_eq!(s.passed, 2);
        assert_eq!(s.average, 61.7);
        assert_eq!(s.highest, Some(95.0));
        assert_eq!(s.lowest, Some(40.0));
        assert_eq!(result_stats(&rules, &[]), ResultStats::default());
    }
}
