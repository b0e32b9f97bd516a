use super::plan_rows;
use crate::formulas;
use crate::training_plan::TrainingPlan;
use std::fmt;
use tabled::settings::Style;
use tabled::Table;

/// Human-readable plan report with one table per week
pub struct PlanReport<'a>(pub &'a TrainingPlan);

impl fmt::Display for PlanReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let plan = self.0;
        writeln!(f, "TRAINING PLAN")?;
        writeln!(f, "Plan: {}", plan.id)?;
        writeln!(
            f,
            "Goal: {}  Model: {}  Weeks: {}  Sessions/week: {}",
            plan.goal, plan.model, plan.duration_weeks, plan.sessions_per_week
        )?;
        if let Some(total) = plan.total_volume {
            writeln!(f, "Total volume: {} kg", formulas::round_to_places(total, 1))?;
        }
        writeln!(f)?;

        for week in &plan.weeks {
            writeln!(f, "Week {} ({})", week.week_number, week.week_type)?;
            writeln!(f, "  {}", week.progression_formula)?;
            match week.volume_target {
                Some(volume) => writeln!(f, "  Volume target: {} kg", formulas::round_to_places(volume, 1))?,
                None => writeln!(f, "  Volume target: n/a")?,
            }

            let rows = plan_rows(std::slice::from_ref(week));
            if rows.is_empty() {
                writeln!(f, "  (no exercises)")?;
            } else {
                let mut table = Table::new(rows);
                table.with(Style::modern());
                writeln!(f, "{}", table)?;
            }
            writeln!(f)?;
        }

        if !plan.warnings.is_empty() {
            writeln!(f, "Warnings:")?;
            for warning in &plan.warnings {
                writeln!(f, "• {}", warning)?;
            }
        }
        Ok(())
    }
}

/// Render a plan as a human-readable report
pub fn render_plan(plan: &TrainingPlan) -> String {
    PlanReport(plan).to_string()
}
