use serde::{Deserialize, Serialize};
use std::path::Path;
use tabled::Tabled;
use thiserror::Error;

use crate::models::{WeekType, WeeklyPlan};
use crate::training_plan::TrainingPlan;

pub mod csv;
pub mod json;
pub mod text;

/// Export format types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportFormat {
    Csv,
    Json,
    Text,
}

impl ExportFormat {
    pub fn from_str(s: &str) -> Result<Self, ExportError> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            "text" | "txt" | "table" => Ok(ExportFormat::Text),
            _ => Err(ExportError::UnsupportedFormat(s.to_string())),
        }
    }

    /// Pick a format from a file extension
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ExportError> {
        let extension = path
            .as_ref()
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| ExportError::UnsupportedFormat(path.as_ref().display().to_string()))?;
        Self::from_str(extension)
    }
}

/// Export errors
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    CsvError(#[from] ::csv::Error),
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

fn display_option<T: std::fmt::Display>(value: &Option<T>) -> String {
    value.as_ref().map_or_else(|| "-".to_string(), |v| v.to_string())
}

/// One prescribed exercise of a plan, flattened for tabular output
#[derive(Debug, Clone, PartialEq, Serialize, Tabled)]
pub struct PlanRow {
    #[tabled(rename = "Week")]
    pub week: u32,
    #[tabled(rename = "Type")]
    pub week_type: WeekType,
    #[tabled(rename = "Session")]
    pub session: u32,
    #[tabled(rename = "Label")]
    pub label: String,
    #[tabled(rename = "Exercise")]
    pub exercise: String,
    #[tabled(rename = "Sets")]
    pub sets: u32,
    #[tabled(rename = "Reps")]
    pub reps: u32,
    #[tabled(rename = "Weight (kg)", display_with = "display_option")]
    pub weight: Option<f64>,
    #[tabled(rename = "Rest (s)", display_with = "display_option")]
    pub rest_seconds: Option<u32>,
    #[tabled(rename = "RPE", display_with = "display_option")]
    pub rpe: Option<f64>,
    #[tabled(rename = "Notes", display_with = "display_option")]
    pub notes: Option<String>,
}

/// Flatten plan weeks into rows, in week / session / exercise order
pub fn plan_rows(weeks: &[WeeklyPlan]) -> Vec<PlanRow> {
    weeks
        .iter()
        .flat_map(|week| {
            week.sessions.iter().flat_map(move |session| {
                session.exercises.iter().map(move |exercise| PlanRow {
                    week: week.week_number,
                    week_type: week.week_type,
                    session: session.session_number,
                    label: session.label.clone(),
                    exercise: exercise.exercise_name.clone(),
                    sets: exercise.sets,
                    reps: exercise.reps,
                    weight: exercise.weight,
                    rest_seconds: exercise.rest_seconds,
                    rpe: exercise.rpe,
                    notes: exercise.notes.clone(),
                })
            })
        })
        .collect()
}

/// Render a plan in the given format
pub fn render_plan(plan: &TrainingPlan, format: ExportFormat) -> Result<String, ExportError> {
    match format {
        ExportFormat::Csv => {
            let mut buffer = Vec::new();
            csv::write_plan(&plan.weeks, &mut buffer)?;
            String::from_utf8(buffer).map_err(|e| ExportError::SerializationError(e.to_string()))
        }
        ExportFormat::Json => json::to_json_string(plan),
        ExportFormat::Text => Ok(text::render_plan(plan)),
    }
}

/// Write a plan to a file in the given format
pub fn export_plan<P: AsRef<Path>>(plan: &TrainingPlan, format: ExportFormat, output_path: P) -> Result<(), ExportError> {
    match format {
        ExportFormat::Csv => csv::export_plan(&plan.weeks, output_path),
        ExportFormat::Json => json::export_json(plan, output_path),
        ExportFormat::Text => {
            std::fs::write(output_path, text::render_plan(plan))?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PlaybookGenerationContext;
    use crate::models::{TargetType, UserPreferences};
    use crate::training_plan::PlanGenerator;

    pub(crate) fn sample_plan() -> TrainingPlan {
        let prefs = UserPreferences {
            plan_duration_weeks: Some(4),
            training_days_per_week: Some(2),
            ..Default::default()
        };
        let mut context = PlaybookGenerationContext::empty("u1", TargetType::Template, &[], prefs);
        for (name, one_rm) in [("Bench Press", 100.0), ("Squat", 140.0)] {
            context.exercise_names.insert(name.to_lowercase(), name.to_string());
            context.current_one_rm_estimates.insert(name.to_string(), one_rm);
        }
        context.exercise_names.insert("pull up".to_string(), "Pull Up".to_string());
        PlanGenerator::new().generate_plan(&context).unwrap()
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!(ExportFormat::from_str("CSV").unwrap(), ExportFormat::Csv);
        assert_eq!(ExportFormat::from_str("txt").unwrap(), ExportFormat::Text);
        assert!(ExportFormat::from_str("pdf").is_err());
        assert_eq!(ExportFormat::from_path("plan.json").unwrap(), ExportFormat::Json);
        assert!(ExportFormat::from_path("plan").is_err());
    }

    #[test]
    fn test_plan_rows() {
        let plan = sample_plan();
        let rows = plan_rows(&plan.weeks);

        // 3 exercises × 4 weeks, linear round robin over 2 sessions
        assert_eq!(rows.len(), 12);
        assert_eq!(rows[0].exercise, "Bench Press");
        assert_eq!(rows[0].session, 1);
        assert_eq!(rows[1].exercise, "Squat");
        assert_eq!(rows[1].session, 1);
        assert_eq!(rows[2].exercise, "Pull Up");
        assert_eq!(rows[2].session, 2);
        assert_eq!(rows[2].weight, None);
        assert_eq!(rows[9].week_type, WeekType::Deload);
    }

    #[test]
    fn test_render_all_formats() {
        let plan = sample_plan();
        for format in [ExportFormat::Csv, ExportFormat::Json, ExportFormat::Text] {
            let rendered = render_plan(&plan, format).unwrap();
            assert!(rendered.contains("Bench Press"), "{:?} output lacks exercise", format);
        }
    }
}
