//! Briefing and budget types exchanged with the external collaborators.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::job::Job;

/// A client briefing, as far as the pipeline reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Briefing {
    pub id: String,
    pub office_id: String,
    pub user_id: String,
    pub project_name: String,
    /// Raw questionnaire answers.
    #[serde(default)]
    pub answers: Value,
    #[serde(default)]
    pub budget_generated: bool,
    pub budget_id: Option<String>,
    /// Project data cached from the last successful analysis.
    pub last_analysis: Option<ProjectData>,
}

impl Briefing {
    /// Budget already produced for this briefing, if the flag says so.
    pub fn generated_budget(&self) -> Option<&str> {
        if self.budget_generated {
            self.budget_id.as_deref()
        } else {
            None
        }
    }
}

/// A named area of the project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaItem {
    pub name: String,
    pub area_m2: f64,
}

/// Structured project data extracted from a briefing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectData {
    pub project_name: String,
    pub typology: String,
    pub areas: Vec<AreaItem>,
    pub disciplines: Vec<String>,
    /// Inputs the analysis worked from, kept for audit.
    #[serde(default)]
    pub raw: Value,
}

impl ProjectData {
    pub fn total_area_m2(&self) -> f64 {
        self.areas.iter().map(|a| a.area_m2).sum()
    }
}

/// Pricing parameters for one discipline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisciplineRate {
    pub discipline: String,
    pub hours_per_m2: f64,
    pub hourly_rate: f64,
}

/// Office-level configuration needed for pricing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfficeConfig {
    pub office_id: String,
    pub currency: String,
    pub default_hourly_rate: f64,
    pub default_hours_per_m2: f64,
    #[serde(default)]
    pub discipline_rates: Vec<DisciplineRate>,
}

impl OfficeConfig {
    /// Rate for a discipline, falling back to the office defaults.
    pub fn rate_for(&self, discipline: &str) -> DisciplineRate {
        self.discipline_rates
            .iter()
            .find(|r| r.discipline == discipline)
            .cloned()
            .unwrap_or_else(|| DisciplineRate {
                discipline: discipline.to_string(),
                hours_per_m2: self.default_hours_per_m2,
                hourly_rate: self.default_hourly_rate,
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisciplineHours {
    pub discipline: String,
    pub hours: f64,
}

/// Output of the hour calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoursBreakdown {
    pub disciplines: Vec<DisciplineHours>,
    pub total_hours: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisciplineValue {
    pub discipline: String,
    pub value: f64,
}

/// Output of the value calculation. Depends on the hour totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuesBreakdown {
    pub currency: String,
    pub disciplines: Vec<DisciplineValue>,
    pub total_value: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetStatus {
    #[default]
    Draft,
    Sent,
    Approved,
    Rejected,
}

/// Budget record handed to the budget sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBudget {
    pub briefing_id: String,
    pub office_id: String,
    pub created_by: String,
    pub project_name: String,
    pub typology: String,
    pub areas: Vec<AreaItem>,
    pub hours: HoursBreakdown,
    pub values: ValuesBreakdown,
    /// Raw inputs of the calculation.
    pub calculation_inputs: Value,
    pub status: BudgetStatus,
    pub generated_automatically: bool,
    pub version: u32,
}

impl NewBudget {
    /// Aggregate the outputs of analysis and calculation for a job.
    pub fn assemble(
        job: &Job,
        project: &ProjectData,
        office: &OfficeConfig,
        hours: HoursBreakdown,
        values: ValuesBreakdown,
    ) -> Self {
        Self {
            briefing_id: job.briefing_id.clone(),
            office_id: job.office_id.clone(),
            created_by: job.user_id.clone(),
            project_name: project.project_name.clone(),
            typology: project.typology.clone(),
            areas: project.areas.clone(),
            hours,
            values,
            calculation_inputs: serde_json::json!({
                "project": project.raw,
                "disciplines": project.disciplines,
                "total_area_m2": project.total_area_m2(),
                "office": office,
                "job_metadata": job.metadata,
                "job_id": job.id.to_string(),
            }),
            status: BudgetStatus::Draft,
            generated_automatically: true,
            version: 1,
        }
    }
}

/// Contact data used to address notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContact {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn office() -> OfficeConfig {
        OfficeConfig {
            office_id: "o-1".into(),
            currency: "BRL".into(),
            default_hourly_rate: 150.0,
            default_hours_per_m2: 0.5,
            discipline_rates: vec![DisciplineRate {
                discipline: "architecture".into(),
                hours_per_m2: 1.2,
                hourly_rate: 200.0,
            }],
        }
    }

    #[test]
    fn rate_falls_back_to_office_defaults() {
        let office = office();
        assert_eq!(office.rate_for("architecture").hourly_rate, 200.0);
        let fallback = office.rate_for("lighting");
        assert_eq!(fallback.hours_per_m2, 0.5);
        assert_eq!(fallback.hourly_rate, 150.0);
    }

    #[test]
    fn generated_budget_requires_flag() {
        let mut briefing = Briefing {
            id: "b-1".into(),
            office_id: "o-1".into(),
            user_id: "u-1".into(),
            project_name: "Casa".into(),
            answers: Value::Null,
            budget_generated: false,
            budget_id: Some("x".into()),
            last_analysis: None,
        };
        assert_eq!(briefing.generated_budget(), None);
        briefing.budget_generated = true;
        assert_eq!(briefing.generated_budget(), Some("x"));
    }
}
