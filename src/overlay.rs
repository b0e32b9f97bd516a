//! Optional refinement of algorithmic output by an external collaborator
//!
//! An overlay receives the same inputs the engine used plus the engine's own
//! result, and may return an alternative. The alternative is only accepted
//! when it keeps the engine's invariants; otherwise, or when the overlay is
//! absent or fails, the algorithmic baseline is returned with a warning.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::context::PlaybookGenerationContext;
use crate::error::{LiftRxError, Result};
use crate::formulas::DEFAULT_INCREMENT_KG;
use crate::models::{WeekType, WeeklyPlan};
use crate::prescription::{SessionRecommendation, SessionRequest};

/// Tolerance when checking a weight sits on the increment grid
const GRID_TOLERANCE: f64 = 1e-6;

/// Collaborator able to refine session prescriptions and plans
pub trait PrescriptionOverlay {
    fn name(&self) -> &str;

    fn refine_session(&self, request: &SessionRequest, baseline: &SessionRecommendation) -> Result<SessionRecommendation>;

    fn refine_plan(&self, context: &PlaybookGenerationContext, baseline: &[WeeklyPlan]) -> Result<Vec<WeeklyPlan>>;
}

/// Which engine produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrescriptionSource {
    Algorithmic,
    Overlay,
}

/// A result together with where it came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayOutcome<T> {
    pub value: T,
    pub source: PrescriptionSource,
    pub warnings: Vec<String>,
}

impl<T> OverlayOutcome<T> {
    fn algorithmic(value: T, warnings: Vec<String>) -> Self {
        Self {
            value,
            source: PrescriptionSource::Algorithmic,
            warnings,
        }
    }
}

fn on_grid(weight: f64, increment: f64) -> bool {
    let steps = weight / increment;
    (steps - steps.round()).abs() < GRID_TOLERANCE
}

fn check_weight(weight: f64, increment: f64, what: &str) -> Result<()> {
    if !weight.is_finite() || weight < 0.0 {
        return Err(LiftRxError::Overlay(format!("{}: invalid weight {}", what, weight)));
    }
    if !on_grid(weight, increment) {
        return Err(LiftRxError::Overlay(format!(
            "{}: weight {} is not a multiple of {}",
            what, weight, increment
        )));
    }
    Ok(())
}

/// Check a refined session keeps the engine's invariants
pub fn validate_session(
    baseline: &SessionRecommendation,
    candidate: &SessionRecommendation,
    increment: f64,
) -> Result<()> {
    if baseline.is_conservative()
        && (candidate.overload_multiplier != 1.0 || !candidate.per_exercise.is_empty())
    {
        return Err(LiftRxError::Overlay(
            "overload prescribed below the safe readiness threshold".to_string(),
        ));
    }
    if !(0.9..=1.1).contains(&candidate.overload_multiplier) {
        return Err(LiftRxError::Overlay(format!(
            "overload multiplier {} outside [0.9, 1.1]",
            candidate.overload_multiplier
        )));
    }
    if !(0.0..=1.0).contains(&candidate.session_predicted_chance) {
        return Err(LiftRxError::Overlay(format!(
            "session chance {} outside [0, 1]",
            candidate.session_predicted_chance
        )));
    }
    for exercise in &candidate.per_exercise {
        if !(0.0..=1.0).contains(&exercise.predicted_chance) {
            return Err(LiftRxError::Overlay(format!(
                "{}: chance {} outside [0, 1]",
                exercise.name, exercise.predicted_chance
            )));
        }
        for set in &exercise.sets {
            if let Some(weight) = set.suggested_weight_kg {
                check_weight(weight, increment, &format!("{} set {}", exercise.name, set.set_id))?;
            }
        }
    }
    Ok(())
}

/// Check a refined plan keeps the engine's invariants
pub fn validate_plan(baseline: &[WeeklyPlan], candidate: &[WeeklyPlan], increment: f64) -> Result<()> {
    if baseline.len() != candidate.len() {
        return Err(LiftRxError::Overlay(format!(
            "plan has {} weeks, expected {}",
            candidate.len(),
            baseline.len()
        )));
    }
    for (i, week) in candidate.iter().enumerate() {
        if week.week_number != i as u32 + 1 {
            return Err(LiftRxError::Overlay(format!(
                "week {} is numbered {}",
                i + 1,
                week.week_number
            )));
        }
        for exercise in week.sessions.iter().flat_map(|s| &s.exercises) {
            if exercise.sets == 0 || exercise.reps == 0 {
                return Err(LiftRxError::Overlay(format!(
                    "week {}: {} has no work prescribed",
                    week.week_number, exercise.exercise_name
                )));
            }
            if let Some(weight) = exercise.weight {
                check_weight(weight, increment, &format!("week {} {}", week.week_number, exercise.exercise_name))?;
            }
        }
        if week.week_type == WeekType::Deload && i > 0 {
            if let (Some(deload), Some(previous)) = (week.volume_target, candidate[i - 1].volume_target) {
                if deload >= previous {
                    return Err(LiftRxError::Overlay(format!(
                        "deload week {} volume {} is not below the previous week's {}",
                        week.week_number, deload, previous
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Refine a session through the overlay, falling back to the baseline
pub fn apply_session_overlay(
    overlay: Option<&dyn PrescriptionOverlay>,
    request: &SessionRequest,
    baseline: SessionRecommendation,
) -> OverlayOutcome<SessionRecommendation> {
    let Some(overlay) = overlay else {
        return OverlayOutcome::algorithmic(baseline, Vec::new());
    };
    let increment = request.min_increment_kg.unwrap_or(DEFAULT_INCREMENT_KG);

    let refined = overlay
        .refine_session(request, &baseline)
        .and_then(|candidate| validate_session(&baseline, &candidate, increment).map(|_| candidate));
    match refined {
        Ok(value) => {
            debug!(overlay = overlay.name(), "Accepted overlay session prescription");
            OverlayOutcome {
                value,
                source: PrescriptionSource::Overlay,
                warnings: Vec::new(),
            }
        }
        Err(e) => {
            warn!(overlay = overlay.name(), error = %e, "Overlay session rejected, using algorithmic prescription");
            let warning = format!("{} overlay not used: {}", overlay.name(), e);
            OverlayOutcome::algorithmic(baseline, vec![warning])
        }
    }
}

/// Refine plan weeks through the overlay, falling back to the baseline
pub fn apply_plan_overlay(
    overlay: Option<&dyn PrescriptionOverlay>,
    context: &PlaybookGenerationContext,
    baseline: Vec<WeeklyPlan>,
) -> OverlayOutcome<Vec<WeeklyPlan>> {
    let Some(overlay) = overlay else {
        return OverlayOutcome::algorithmic(baseline, Vec::new());
    };
    let increment = context
        .preferences
        .min_increment_kg
        .filter(|v| v.is_finite() && *v > 0.0)
        .unwrap_or(DEFAULT_INCREMENT_KG);

    let refined = overlay
        .refine_plan(context, &baseline)
        .and_then(|candidate| validate_plan(&baseline, &candidate, increment).map(|_| candidate));
    match refined {
        Ok(value) => {
            debug!(overlay = overlay.name(), "Accepted overlay plan");
            OverlayOutcome {
                value,
                source: PrescriptionSource::Overlay,
                warnings: Vec::new(),
            }
        }
        Err(e) => {
            warn!(overlay = overlay.name(), error = %e, "Overlay plan rejected, using algorithmic plan");
            let warning = format!("{} overlay not used: {}", overlay.name(), e);
            OverlayOutcome::algorithmic(baseline, vec![warning])
        }
    }
}
