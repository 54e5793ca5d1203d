//! Area-based briefing analysis and pricing.
//!
//! Reads the project areas straight from the questionnaire answers and
//! prices every discipline as `area * hours_per_m2 * hourly_rate` using the
//! office rates. Deployments with a richer analyzer plug it in through
//! [`PipelineDeps`](crate::PipelineDeps) instead.

use futures_util::future::BoxFuture;
use pipeline_core::ports::{BriefingAnalyzer, BudgetCalculator};
use pipeline_core::{
    AreaItem, Briefing, DisciplineHours, DisciplineValue, HoursBreakdown, OfficeConfig, PortError,
    PortResult, ProjectData, ValuesBreakdown,
};
use serde_json::Value;

const DEFAULT_TYPOLOGY: &str = "residential";
const DEFAULT_DISCIPLINE: &str = "architecture";

/// Analyzer and calculator working from declared areas.
#[derive(Debug, Clone, Copy, Default)]
pub struct AreaBasedEstimator;

impl AreaBasedEstimator {
    /// Project data from the answers.
    ///
    /// Areas come from an `areas` list of `{name, area_m2}` objects or a
    /// single `area_m2` total.
    pub fn project_data(briefing: &Briefing) -> PortResult<ProjectData> {
        let answers = &briefing.answers;

        let mut areas: Vec<AreaItem> = match answers.get("areas") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| {
                    let area_m2 = item.get("area_m2")?.as_f64()?;
                    let name = item.get("name").and_then(Value::as_str).unwrap_or("area");
                    Some(AreaItem {
                        name: name.to_string(),
                        area_m2,
                    })
                })
                .collect(),
            _ => Vec::new(),
        };
        if areas.is_empty() {
            if let Some(total) = answers.get("area_m2").and_then(Value::as_f64) {
                areas.push(AreaItem {
                    name: "total".to_string(),
                    area_m2: total,
                });
            }
        }
        areas.retain(|a| a.area_m2.is_finite() && a.area_m2 > 0.0);
        if areas.is_empty() {
            return Err(PortError::failed(format!(
                "briefing {} declares no project area",
                briefing.id
            )));
        }

        let mut disciplines: Vec<String> = answers
            .get("disciplines")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if disciplines.is_empty() {
            disciplines.push(DEFAULT_DISCIPLINE.to_string());
        }

        Ok(ProjectData {
            project_name: briefing.project_name.clone(),
            typology: answers
                .get("typology")
                .and_then(Value::as_str)
                .unwrap_or(DEFAULT_TYPOLOGY)
                .to_string(),
            areas,
            disciplines,
            raw: answers.clone(),
        })
    }

    pub fn hours(project: &ProjectData, office: &OfficeConfig) -> HoursBreakdown {
        let area = project.total_area_m2();
        let disciplines: Vec<DisciplineHours> = project
            .disciplines
            .iter()
            .map(|d| DisciplineHours {
                discipline: d.clone(),
                hours: round2(area * office.rate_for(d).hours_per_m2),
            })
            .collect();
        let total_hours = round2(disciplines.iter().map(|d| d.hours).sum());
        HoursBreakdown {
            disciplines,
            total_hours,
        }
    }

    pub fn values(hours: &HoursBreakdown, office: &OfficeConfig) -> ValuesBreakdown {
        let disciplines: Vec<DisciplineValue> = hours
            .disciplines
            .iter()
            .map(|h| DisciplineValue {
                discipline: h.discipline.clone(),
                value: round2(h.hours * office.rate_for(&h.discipline).hourly_rate),
            })
            .collect();
        let total_value = round2(disciplines.iter().map(|d| d.value).sum());
        ValuesBreakdown {
            currency: office.currency.clone(),
            disciplines,
            total_value,
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl BriefingAnalyzer for AreaBasedEstimator {
    fn analyze<'a>(&'a self, briefing: &'a Briefing) -> BoxFuture<'a, PortResult<ProjectData>> {
        Box::pin(async move { Self::project_data(briefing) })
    }
}

impl BudgetCalculator for AreaBasedEstimator {
    fn calculate_hours<'a>(
        &'a self,
        project: &'a ProjectData,
        office: &'a OfficeConfig,
    ) -> BoxFuture<'a, PortResult<HoursBreakdown>> {
        Box::pin(async move { Ok(Self::hours(project, office)) })
    }

    fn calculate_values<'a>(
        &'a self,
        _project: &'a ProjectData,
        hours: &'a HoursBreakdown,
        office: &'a OfficeConfig,
    ) -> BoxFuture<'a, PortResult<ValuesBreakdown>> {
        Box::pin(async move { Ok(Self::values(hours, office)) })
    }
}
