use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;
use crate::formulas;

/// Kilograms per pound
pub const KG_PER_LB: f64 = 0.453_592_37;

/// Weight unit a set was logged in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightUnit {
    #[default]
    Kg,
    Lbs,
}

impl WeightUnit {
    /// Convert a value expressed in this unit to kilograms
    pub fn to_kg(&self, value: f64) -> f64 {
        match self {
            WeightUnit::Kg => value,
            WeightUnit::Lbs => value * KG_PER_LB,
        }
    }
}

impl FromStr for WeightUnit {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "kg" | "kgs" | "kilograms" => Ok(WeightUnit::Kg),
            "lb" | "lbs" | "pounds" => Ok(WeightUnit::Lbs),
            _ => Err(ValidationError::UnknownValue {
                field: "weight unit".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for WeightUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WeightUnit::Kg => write!(f, "kg"),
            WeightUnit::Lbs => write!(f, "lbs"),
        }
    }
}

/// Normalised grouping key for an exercise name.
///
/// "Bench  Press", "bench press" and " Bench Press " all map to the same key.
pub fn exercise_key(name: &str) -> String {
    name.split_whitespace()
        .map(|part| part.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// One historical performed set, as logged by the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseSetRecord {
    /// Resolved exercise name
    pub exercise_name: String,

    /// Master exercise identifier, when the set is linked to one
    #[serde(default)]
    pub exercise_id: Option<String>,

    /// Load lifted, in `unit`
    pub weight: Option<f64>,

    /// Repetitions per set
    pub reps: Option<u32>,

    /// Number of sets performed at this weight/reps
    #[serde(default = "default_set_count")]
    pub sets: u32,

    /// Unit of `weight`; falls back to the user's preferred unit
    #[serde(default)]
    pub unit: Option<WeightUnit>,

    /// Derived sets × reps × weight, in `unit`
    #[serde(default)]
    pub volume_load: Option<f64>,

    /// Derived one-rep-max estimate, in `unit`
    #[serde(default)]
    pub one_rm_estimate: Option<f64>,

    /// Date the set was performed
    pub workout_date: NaiveDate,
}

fn default_set_count() -> u32 {
    1
}

impl ExerciseSetRecord {
    /// Create a record with its derived volume load and 1RM filled in
    pub fn new(
        exercise_name: impl Into<String>,
        weight: Option<f64>,
        reps: Option<u32>,
        sets: u32,
        unit: Option<WeightUnit>,
        workout_date: NaiveDate,
    ) -> Self {
        let mut record = ExerciseSetRecord {
            exercise_name: exercise_name.into(),
            exercise_id: None,
            weight,
            reps,
            sets,
            unit,
            volume_load: None,
            one_rm_estimate: None,
            workout_date,
        };
        record.fill_derived();
        record
    }

    /// Link the record to a master exercise
    pub fn with_exercise_id(mut self, id: impl Into<String>) -> Self {
        self.exercise_id = Some(id.into());
        self
    }

    /// Fill in `unit` when the set was recorded without one
    pub fn or_unit(mut self, unit: WeightUnit) -> Self {
        self.unit = self.unit.or(Some(unit));
        self
    }

    /// Recompute the derived fields from weight, reps and sets
    pub fn fill_derived(&mut self) {
        self.volume_load = Some(formulas::volume_load(Some(self.sets), self.reps, self.weight));
        self.one_rm_estimate = match (self.weight, self.reps) {
            (Some(w), Some(r)) if w > 0.0 && r > 0 => Some(formulas::estimate_one_rep_max(w, r)),
            _ => None,
        };
    }

    /// Grouping key for the exercise name
    pub fn key(&self) -> String {
        exercise_key(&self.exercise_name)
    }

    fn unit_or(&self, default_unit: WeightUnit) -> WeightUnit {
        self.unit.unwrap_or(default_unit)
    }

    /// Weight in kilograms, if a valid weight was logged
    pub fn weight_kg(&self, default_unit: WeightUnit) -> Option<f64> {
        self.weight
            .filter(|w| w.is_finite() && *w >= 0.0)
            .map(|w| self.unit_or(default_unit).to_kg(w))
    }

    /// Volume load in kilograms (stored value, or computed when absent)
    pub fn volume_load_kg(&self, default_unit: WeightUnit) -> f64 {
        let raw = self
            .volume_load
            .filter(|v| v.is_finite())
            .unwrap_or_else(|| formulas::volume_load(Some(self.sets), self.reps, self.weight));
        self.unit_or(default_unit).to_kg(raw).max(0.0)
    }

    /// Best 1RM estimate in kilograms: the larger of the stored and computed values
    pub fn one_rm_kg(&self, default_unit: WeightUnit) -> Option<f64> {
        let computed = match (self.weight, self.reps) {
            (Some(w), Some(r)) => Some(formulas::estimate_one_rep_max(w, r)),
            _ => None,
        };
        let best = [self.one_rm_estimate, computed]
            .into_iter()
            .flatten()
            .filter(|v| v.is_finite() && *v > 0.0)
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))));
        best.map(|v| self.unit_or(default_unit).to_kg(v))
    }
}

/// One logged training session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Storage identifier
    pub session_id: String,

    /// Template the session was started from, if any
    #[serde(default)]
    pub template_id: Option<String>,

    /// Date of the session
    pub workout_date: NaiveDate,

    /// Sets performed, in logging order
    pub sets: Vec<ExerciseSetRecord>,
}

/// What a context request is scoped to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    Template,
    MasterExercise,
}

impl FromStr for TargetType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "template" => Ok(TargetType::Template),
            "master_exercise" | "exercise" => Ok(TargetType::MasterExercise),
            _ => Err(ValidationError::UnknownValue {
                field: "target type".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Training experience of the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperienceLevel {
    Beginner,
    #[default]
    Intermediate,
    Advanced,
}

impl FromStr for ExperienceLevel {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "beginner" | "novice" => Ok(ExperienceLevel::Beginner),
            "intermediate" => Ok(ExperienceLevel::Intermediate),
            "advanced" | "expert" => Ok(ExperienceLevel::Advanced),
            _ => Err(ValidationError::UnknownValue {
                field: "experience level".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Training quality an exercise is programmed for
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExerciseTag {
    Strength,
    Hypertrophy,
    Endurance,
}

/// Planned target for one set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetTarget {
    pub set_id: String,
    #[serde(default)]
    pub target_reps: Option<u32>,
    #[serde(default)]
    pub target_weight_kg: Option<f64>,
    #[serde(default)]
    pub target_rpe: Option<f64>,
}

/// A planned exercise supplied by the caller (template or session data)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExercisePlanTarget {
    pub exercise_id: String,
    pub name: String,
    #[serde(default)]
    pub tags: BTreeSet<ExerciseTag>,
    pub sets: Vec<SetTarget>,
}

impl ExercisePlanTarget {
    pub fn has_tag(&self, tag: ExerciseTag) -> bool {
        self.tags.contains(&tag)
    }
}

/// Prescription for a single set of the current session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetPrescription {
    pub set_id: String,
    pub suggested_weight_kg: Option<f64>,
    pub suggested_reps: Option<u32>,
    pub suggested_rest_seconds: Option<u32>,
    pub rationale: String,
}

/// One row of a weekly training plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExercisePrescription {
    pub exercise_name: String,
    pub sets: u32,
    pub reps: u32,
    pub weight: Option<f64>,
    pub rest_seconds: Option<u32>,
    pub rpe: Option<f64>,
    pub notes: Option<String>,
}

impl ExercisePrescription {
    /// sets × reps × weight, zero when no weight is prescribed
    pub fn volume(&self) -> f64 {
        formulas::volume_load(Some(self.sets), Some(self.reps), self.weight)
    }
}

/// One planned session within a week
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionPrescription {
    /// 1-based position within the week
    pub session_number: u32,
    pub label: String,
    pub exercises: Vec<ExercisePrescription>,
}

/// Kind of planned week
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeekType {
    Training,
    Deload,
    PrAttempt,
}

impl fmt::Display for WeekType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WeekType::Training => write!(f, "training"),
            WeekType::Deload => write!(f, "deload"),
            WeekType::PrAttempt => write!(f, "pr_attempt"),
        }
    }
}

/// One week of a generated plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyPlan {
    pub week_number: u32,
    pub week_type: WeekType,
    pub sessions: Vec<SessionPrescription>,
    pub volume_target: Option<f64>,
    pub progression_formula: String,
}

/// How aggressively weekly loads progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressionType {
    Conservative,
    #[default]
    Moderate,
    Aggressive,
}

impl ProgressionType {
    /// Multiplier applied to the weekly progression step
    pub fn step_scale(&self) -> f64 {
        match self {
            ProgressionType::Conservative => 0.8,
            ProgressionType::Moderate => 1.0,
            ProgressionType::Aggressive => 1.2,
        }
    }
}

impl FromStr for ProgressionType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "conservative" => Ok(ProgressionType::Conservative),
            "moderate" | "linear" => Ok(ProgressionType::Moderate),
            "aggressive" => Ok(ProgressionType::Aggressive),
            _ => Err(ValidationError::UnknownValue {
                field: "progression type".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Preferences supplied by the user preference provider. Every field is optional.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UserPreferences {
    pub default_weight_unit: Option<WeightUnit>,
    pub progression_type: Option<ProgressionType>,
    pub training_days_per_week: Option<u32>,
    pub experience_level: Option<ExperienceLevel>,
    pub goal_preset: Option<String>,
    pub plan_duration_weeks: Option<u32>,
    pub min_increment_kg: Option<f64>,
    /// User-entered 1RMs (kg) that replace history-derived estimates
    pub one_rm_overrides: BTreeMap<String, f64>,
}

impl UserPreferences {
    pub fn weight_unit(&self) -> WeightUnit {
        self.default_weight_unit.unwrap_or_default()
    }
}

/// exercise name → best-known 1RM in kilograms
pub type OneRmEstimateMap = BTreeMap<String, f64>;

#[cfg(test)]
mod tests {
    use super::*;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[test]
    fn test_exercise_key_normalisation() {
        assert_eq!(exercise_key("  Bench   Press "), "bench press");
        assert_eq!(exercise_key("Bench Press"), exercise_key("bench press"));
    }

    #[test]
    fn test_record_derived_fields() {
        let record = ExerciseSetRecord::new("Squat", Some(100.0), Some(5), 3, None, date(1));
        assert_eq!(record.volume_load, Some(1500.0));
        assert_eq!(record.one_rm_estimate, Some(112.5));
    }

    #[test]
    fn test_record_without_weight_has_no_one_rm() {
        let record = ExerciseSetRecord::new("Pull Up", None, Some(10), 3, None, date(1));
        assert_eq!(record.volume_load, Some(0.0));
        assert_eq!(record.one_rm_estimate, None);
        assert_eq!(record.one_rm_kg(WeightUnit::Kg), None);
    }

    #[test]
    fn test_unit_conversion() {
        let record = ExerciseSetRecord::new("Deadlift", Some(225.0), Some(1), 1, Some(WeightUnit::Lbs), date(2));
        let kg = record.weight_kg(WeightUnit::Kg).unwrap();
        assert!((kg - 102.058).abs() < 0.01);

        // Records without a unit fall back to the preference
        let unitless = ExerciseSetRecord::new("Deadlift", Some(100.0), Some(1), 1, None, date(2));
        assert!((unitless.one_rm_kg(WeightUnit::Lbs).unwrap() - 45.359).abs() < 0.01);
    }

    #[test]
    fn test_or_unit_only_fills_missing() {
        let unitless = ExerciseSetRecord::new("Squat", Some(225.0), Some(1), 1, None, date(2)).or_unit(WeightUnit::Lbs);
        assert_eq!(unitless.unit, Some(WeightUnit::Lbs));

        let kg = ExerciseSetRecord::new("Squat", Some(100.0), Some(1), 1, Some(WeightUnit::Kg), date(2))
            .or_unit(WeightUnit::Lbs);
        assert_eq!(kg.unit, Some(WeightUnit::Kg));
    }

    #[test]
    fn test_stored_one_rm_wins_when_higher() {
        let mut record = ExerciseSetRecord::new("Squat", Some(100.0), Some(5), 1, None, date(3));
        record.one_rm_estimate = Some(130.0);
        assert_eq!(record.one_rm_kg(WeightUnit::Kg), Some(130.0));
    }

    #[test]
    fn test_enum_parsing() {
        assert_eq!("lbs".parse::<WeightUnit>().unwrap(), WeightUnit::Lbs);
        assert_eq!("Beginner".parse::<ExperienceLevel>().unwrap(), ExperienceLevel::Beginner);
        assert_eq!("master-exercise".parse::<TargetType>().unwrap(), TargetType::MasterExercise);
        assert!("stone".parse::<WeightUnit>().is_err());
        assert_eq!(ProgressionType::default().step_scale(), 1.0);
    }

    #[test]
    fn test_preferences_deserialize_with_missing_fields() {
        let prefs: UserPreferences = serde_json::from_str(r#"{"training_days_per_week": 4}"#).unwrap();
        assert_eq!(prefs.training_days_per_week, Some(4));
        assert_eq!(prefs.weight_unit(), WeightUnit::Kg);
        assert!(prefs.one_rm_overrides.is_empty());
    }

    #[test]
    fn test_week_type_serialization() {
        let json = serde_json::to_string(&WeekType::PrAttempt).unwrap();
        assert_eq!(json, "\"pr_attempt\"");
        assert_eq!(WeekType::Deload.to_string(), "deload");
    }
}
