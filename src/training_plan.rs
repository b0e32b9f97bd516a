use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::context::PlaybookGenerationContext;
use crate::error::{Result, ValidationError};
use crate::formulas::{self, DEFAULT_INCREMENT_KG};
use crate::models::{exercise_key, ExercisePrescription, ProgressionType, SessionPrescription, WeekType, WeeklyPlan};

/// Shortest supported plan
pub const MIN_PLAN_WEEKS: u32 = 4;
/// Longest supported plan
pub const MAX_PLAN_WEEKS: u32 = 6;

/// Week forced to a deload in the linear and DUP models
const DELOAD_WEEK: u32 = 4;

/// Weekly load progression of the linear and DUP models
const WEEKLY_STEP: f64 = 0.025;

/// Training goal presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalPreset {
    Strength,
    Hypertrophy,
    Powerlifting,
    Peaking,
    Endurance,
    General,
}

impl FromStr for GoalPreset {
    type Err = ValidationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "strength" => Ok(Self::Strength),
            "hypertrophy" | "muscle" => Ok(Self::Hypertrophy),
            "powerlifting" => Ok(Self::Powerlifting),
            "peaking" | "peak" => Ok(Self::Peaking),
            "endurance" => Ok(Self::Endurance),
            "general" | "general-fitness" | "general_fitness" => Ok(Self::General),
            _ => Err(ValidationError::UnknownGoal { goal: s.to_string() }),
        }
    }
}

impl fmt::Display for GoalPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Strength => "strength",
            Self::Hypertrophy => "hypertrophy",
            Self::Powerlifting => "powerlifting",
            Self::Peaking => "peaking",
            Self::Endurance => "endurance",
            Self::General => "general",
        };
        write!(f, "{}", name)
    }
}

/// Periodization model for training plans
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodizationModel {
    /// Volume phase → deload → intensity phase
    Linear,
    /// Daily undulating: heavy / medium / light sessions each week
    Dup,
    /// Accumulation → intensification → realization
    Block,
}

impl fmt::Display for PeriodizationModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Linear => write!(f, "linear"),
            Self::Dup => write!(f, "dup"),
            Self::Block => write!(f, "block"),
        }
    }
}

/// Pick the periodization model for a goal and experience
pub fn select_model(goal: GoalPreset, experienced: bool) -> PeriodizationModel {
    match (goal, experienced) {
        (GoalPreset::Powerlifting | GoalPreset::Peaking, _) => PeriodizationModel::Block,
        (GoalPreset::Strength | GoalPreset::Hypertrophy, true) => PeriodizationModel::Dup,
        _ => PeriodizationModel::Linear,
    }
}

/// Planner settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerSettings {
    pub default_duration_weeks: u32,
    pub default_sessions_per_week: u32,
    /// Logged sessions needed to count as experienced
    pub experienced_session_threshold: usize,
    pub default_goal: String,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        PlannerSettings {
            default_duration_weeks: MIN_PLAN_WEEKS,
            default_sessions_per_week: 3,
            experienced_session_threshold: 12,
            default_goal: "strength".to_string(),
        }
    }
}

/// An exercise to program, with its 1RM when known
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanExercise {
    pub name: String,
    pub one_rm: Option<f64>,
}

/// Validated inputs to plan generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanParameters {
    pub goal: GoalPreset,
    pub model: PeriodizationModel,
    pub duration_weeks: u32,
    pub sessions_per_week: u32,
    pub increment_kg: f64,
    pub progression: ProgressionType,
    pub experienced: bool,
    /// Alphabetical by exercise key
    pub exercises: Vec<PlanExercise>,
}

/// A generated plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingPlan {
    pub id: Uuid,
    pub user_id: String,
    pub goal: GoalPreset,
    pub model: PeriodizationModel,
    pub duration_weeks: u32,
    pub sessions_per_week: u32,
    pub progression: ProgressionType,
    pub weeks: Vec<WeeklyPlan>,
    pub total_volume: Option<f64>,
    pub warnings: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Sets, reps and intensity (fraction of 1RM) of one prescription row
#[derive(Debug, Clone, Copy, PartialEq)]
struct Scheme {
    sets: u32,
    reps: u32,
    intensity: f64,
}

/// DUP day types, cycled by session index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DupDay {
    Heavy,
    Medium,
    Light,
}

impl DupDay {
    fn for_session(index: u32) -> Self {
        match index % 3 {
            0 => DupDay::Heavy,
            1 => DupDay::Medium,
            _ => DupDay::Light,
        }
    }

    fn scheme(&self) -> Scheme {
        match self {
            DupDay::Heavy => Scheme { sets: 5, reps: 3, intensity: 0.85 },
            DupDay::Medium => Scheme { sets: 4, reps: 6, intensity: 0.75 },
            DupDay::Light => Scheme { sets: 3, reps: 10, intensity: 0.65 },
        }
    }

    fn rest_seconds(&self) -> u32 {
        match self {
            DupDay::Heavy => 240,
            DupDay::Medium => 120,
            DupDay::Light => 90,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            DupDay::Heavy => "Heavy",
            DupDay::Medium => "Medium",
            DupDay::Light => "Light",
        }
    }
}

const MAX_ATTEMPT: Scheme = Scheme {
    sets: 5,
    reps: 1,
    intensity: 0.95,
};
const MAX_ATTEMPT_REST_SECONDS: u32 = 300;

fn percent(intensity: f64) -> String {
    format!("{}%", formulas::round_to_places(intensity * 100.0, 1))
}

/// `round(1RM × intensity / increment) × increment`
pub fn prescribed_weight(one_rm: f64, intensity: f64, increment: f64) -> f64 {
    formulas::round_to_places(formulas::round_to_increment(one_rm * intensity, increment), 2)
}

/// Σ sets × reps × weight over rows with a weight; `None` when no row has one
pub fn week_volume(sessions: &[SessionPrescription]) -> Option<f64> {
    let weighted: Vec<f64> = sessions
        .iter()
        .flat_map(|s| &s.exercises)
        .filter(|e| e.weight.is_some())
        .map(ExercisePrescription::volume)
        .collect();
    if weighted.is_empty() {
        None
    } else {
        Some(formulas::round_to_places(weighted.iter().sum(), 2))
    }
}

/// Periodization planner
pub struct PlanGenerator {
    settings: PlannerSettings,
}

impl PlanGenerator {
    pub fn new() -> Self {
        Self {
            settings: PlannerSettings::default(),
        }
    }

    pub fn with_config(settings: PlannerSettings) -> Self {
        Self { settings }
    }

    /// Validate preferences and resolve everything generation needs.
    /// Malformed parameters fail here, before any weeks are built.
    pub fn resolve_parameters(&self, context: &PlaybookGenerationContext) -> Result<PlanParameters> {
        let prefs = &context.preferences;

        let duration_weeks = prefs.plan_duration_weeks.unwrap_or(self.settings.default_duration_weeks);
        if !(MIN_PLAN_WEEKS..=MAX_PLAN_WEEKS).contains(&duration_weeks) {
            return Err(ValidationError::InvalidDuration { weeks: duration_weeks }.into());
        }

        let sessions_per_week = prefs
            .training_days_per_week
            .unwrap_or(self.settings.default_sessions_per_week);
        if !(1..=7).contains(&sessions_per_week) {
            return Err(ValidationError::InvalidSessionsPerWeek { days: sessions_per_week }.into());
        }

        let goal: GoalPreset = prefs
            .goal_preset
            .as_deref()
            .unwrap_or(&self.settings.default_goal)
            .parse()?;

        let increment_kg = match prefs.min_increment_kg {
            Some(value) if !value.is_finite() || value <= 0.0 => {
                return Err(ValidationError::InvalidIncrement { value }.into());
            }
            Some(value) => value,
            None => DEFAULT_INCREMENT_KG,
        };

        let experienced = context.total_sessions >= self.settings.experienced_session_threshold;
        let model = select_model(goal, experienced);
        debug!(%goal, experienced, %model, "Selected periodization model");

        Ok(PlanParameters {
            goal,
            model,
            duration_weeks,
            sessions_per_week,
            increment_kg,
            progression: prefs.progression_type.unwrap_or_default(),
            experienced,
            exercises: plan_exercises(context),
        })
    }

    /// Generate a full plan for the context
    #[instrument(skip_all, fields(user_id = %context.user_id))]
    pub fn generate_plan(&self, context: &PlaybookGenerationContext) -> Result<TrainingPlan> {
        let params = self.resolve_parameters(context)?;
        let mut warnings = Vec::new();

        if params.exercises.is_empty() {
            warn!(user_id = %context.user_id, "No exercises available to plan");
            warnings.push("No exercises in history or 1RM estimates; sessions are empty".to_string());
        }
        for exercise in params.exercises.iter().filter(|e| e.one_rm.is_none()) {
            warn!(exercise = %exercise.name, "No 1RM estimate, weights left open");
            warnings.push(format!("{}: no 1RM estimate, weights left open", exercise.name));
        }

        let weeks = generate_weeks(&params);
        let volumes: Vec<f64> = weeks.iter().filter_map(|w| w.volume_target).collect();
        let total_volume = if volumes.is_empty() {
            None
        } else {
            Some(formulas::round_to_places(volumes.iter().sum(), 2))
        };

        info!(
            user_id = %context.user_id,
            model = %params.model,
            weeks = weeks.len(),
            exercises = params.exercises.len(),
            "Generated training plan"
        );

        Ok(TrainingPlan {
            id: Uuid::new_v4(),
            user_id: context.user_id.clone(),
            goal: params.goal,
            model: params.model,
            duration_weeks: params.duration_weeks,
            sessions_per_week: params.sessions_per_week,
            progression: params.progression,
            weeks,
            total_volume,
            warnings,
            created_at: Utc::now(),
        })
    }
}

impl Default for PlanGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Every exercise in the history or the 1RM map, alphabetical by key
fn plan_exercises(context: &PlaybookGenerationContext) -> Vec<PlanExercise> {
    let mut names: BTreeMap<String, String> = context.exercise_names.clone();
    for name in context.current_one_rm_estimates.keys() {
        names.entry(exercise_key(name)).or_insert_with(|| name.clone());
    }

    names
        .into_iter()
        .filter(|(key, _)| !key.is_empty())
        .map(|(_, name)| {
            let one_rm = context
                .current_one_rm_estimates
                .get(&name)
                .copied()
                .filter(|v| v.is_finite() && *v > 0.0);
            PlanExercise { name, one_rm }
        })
        .collect()
}

/// Build the weeks for resolved parameters
pub fn generate_weeks(params: &PlanParameters) -> Vec<WeeklyPlan> {
    (1..=params.duration_weeks)
        .map(|week| match params.model {
            PeriodizationModel::Linear => linear_week(params, week),
            PeriodizationModel::Dup => dup_week(params, week),
            PeriodizationModel::Block => block_week(params, week),
        })
        .collect()
}

fn row(exercise: &PlanExercise, scheme: Scheme, increment: f64, rest_seconds: Option<u32>, note: Option<&str>) -> ExercisePrescription {
    let weight = exercise
        .one_rm
        .map(|one_rm| prescribed_weight(one_rm, scheme.intensity, increment));
    let notes = match (weight, note) {
        (None, Some(note)) => Some(format!("{}; no 1RM estimate, choose a load for the target reps", note)),
        (None, None) => Some("no 1RM estimate, choose a load for the target reps".to_string()),
        (Some(_), note) => note.map(str::to_string),
    };
    ExercisePrescription {
        exercise_name: exercise.name.clone(),
        sets: scheme.sets,
        reps: scheme.reps,
        weight,
        rest_seconds,
        rpe: None,
        notes,
    }
}

fn week_type_for(params: &PlanParameters, week: u32, has_deload: bool) -> WeekType {
    if has_deload && week == DELOAD_WEEK {
        WeekType::Deload
    } else if week == params.duration_weeks {
        WeekType::PrAttempt
    } else {
        WeekType::Training
    }
}

fn linear_week(params: &PlanParameters, week: u32) -> WeeklyPlan {
    let step = WEEKLY_STEP * params.progression.step_scale();
    let week_type = week_type_for(params, week, true);

    let (mut scheme, phase) = if week == DELOAD_WEEK {
        (Scheme { sets: 3, reps: 5, intensity: 0.60 }, "deload")
    } else if week < DELOAD_WEEK {
        let intensity = 0.70 + step * (week - 1) as f64;
        (Scheme { sets: 3, reps: 10, intensity }, "volume phase")
    } else {
        let intensity = 0.80 + step * (week - DELOAD_WEEK) as f64;
        (Scheme { sets: 5, reps: 5, intensity }, "intensity phase")
    };

    let mut note = None;
    let mut formula = format!("{}: {}×{} @ {} 1RM", phase, scheme.sets, scheme.reps, percent(scheme.intensity));
    if week_type == WeekType::PrAttempt {
        scheme.intensity *= 1.05;
        note = Some("PR attempt");
        formula = format!("{} ×1.05 PR attempt = {} 1RM", formula, percent(scheme.intensity));
    }

    let session_count = params.sessions_per_week as usize;
    let mut sessions: Vec<SessionPrescription> = (1..=params.sessions_per_week)
        .map(|n| SessionPrescription {
            session_number: n,
            label: format!("Session {}", n),
            exercises: Vec::new(),
        })
        .collect();
    for (i, exercise) in params.exercises.iter().enumerate() {
        sessions[i % session_count]
            .exercises
            .push(row(exercise, scheme, params.increment_kg, None, note));
    }

    WeeklyPlan {
        week_number: week,
        week_type,
        volume_target: week_volume(&sessions),
        sessions,
        progression_formula: formula,
    }
}

fn dup_week(params: &PlanParameters, week: u32) -> WeeklyPlan {
    let step = WEEKLY_STEP * params.progression.step_scale();
    let progression = 1.0 + step * (week - 1) as f64;
    let week_type = week_type_for(params, week, true);

    let sessions: Vec<SessionPrescription> = (0..params.sessions_per_week)
        .map(|index| {
            let day = DupDay::for_session(index);
            let (mut scheme, mut rest, mut label, mut note) = (day.scheme(), day.rest_seconds(), day.label(), None);
            match week_type {
                WeekType::Deload => {
                    scheme.sets = ((scheme.sets as f64 * 0.6).round() as u32).max(1);
                    scheme.intensity *= 0.7;
                    note = Some("deload");
                }
                WeekType::PrAttempt if index == 0 => {
                    scheme = MAX_ATTEMPT;
                    rest = MAX_ATTEMPT_REST_SECONDS;
                    label = "Max attempt";
                    note = Some("PR attempt");
                }
                _ => {}
            }
            scheme.intensity *= progression;

            SessionPrescription {
                session_number: index + 1,
                label: label.to_string(),
                exercises: params
                    .exercises
                    .iter()
                    .map(|exercise| row(exercise, scheme, params.increment_kg, Some(rest), note))
                    .collect(),
            }
        })
        .collect();

    let mut formula = format!(
        "DUP heavy 5×3 @ 85% / medium 4×6 @ 75% / light 3×10 @ 65% of 1RM × (1 + {}×{})",
        formulas::round_to_places(step, 4),
        week - 1
    );
    match week_type {
        WeekType::Deload => formula.push_str("; deload: sets ×0.6, intensity ×0.7"),
        WeekType::PrAttempt => formula.push_str("; session 1 max attempt 5×1 @ 95%"),
        WeekType::Training => {}
    }

    WeeklyPlan {
        week_number: week,
        week_type,
        volume_target: week_volume(&sessions),
        sessions,
        progression_formula: formula,
    }
}

fn block_week(params: &PlanParameters, week: u32) -> WeeklyPlan {
    let (scheme, phase) = match week {
        1 | 2 => (Scheme { sets: 4, reps: 10, intensity: 0.70 }, "Accumulation"),
        3 | 4 => (Scheme { sets: 5, reps: 5, intensity: 0.82 }, "Intensification"),
        _ => (Scheme { sets: 3, reps: 3, intensity: 0.90 }, "Realization"),
    };
    let week_type = week_type_for(params, week, false);
    let note = (week_type == WeekType::PrAttempt).then_some("PR attempt");

    let sessions: Vec<SessionPrescription> = (1..=params.sessions_per_week)
        .map(|n| SessionPrescription {
            session_number: n,
            label: phase.to_string(),
            exercises: params
                .exercises
                .iter()
                .map(|exercise| row(exercise, scheme, params.increment_kg, None, note))
                .collect(),
        })
        .collect();

    WeeklyPlan {
        week_number: week,
        week_type,
        volume_target: week_volume(&sessions),
        sessions,
        progression_formula: format!(
            "{}: {}×{} @ {} 1RM",
            phase.to_lowercase(),
            scheme.sets,
            scheme.reps,
            percent(scheme.intensity)
        ),
    }
}

/// Generate plan weeks from a context with default settings
pub fn generate_algorithmic_plan(context: &PlaybookGenerationContext) -> Result<Vec<WeeklyPlan>> {
    PlanGenerator::new().generate_plan(context).map(|plan| plan.weeks)
}
