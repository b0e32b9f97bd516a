//! Per-set prescriptions for today's session
//!
//! Applies readiness to the caller's planned targets:
//!
//! * overload multiplier `Δ = clip(1 + 0.3 × (rho − 0.5), 0.9, 1.1)`, capped
//!   at 1.05 for beginners
//! * fatigue decay `f(i) = 1 − 0.05 × i` across sets (never below zero)
//! * rest by readiness tier (120 s / 150 s / 180 s) plus 15 s per set
//! * chance to beat the previous best volume,
//!   `p = clip(0.5 + 0.35 × (rho − 0.5) + 0.15 × ln γ, 0.05, 0.98)`
//!
//! Below the unsafe readiness threshold a fixed conservative response is
//! returned instead. Values absent from the input stay `None` and produce a
//! warning.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, ValidationError};
use crate::formulas::{self, DEFAULT_INCREMENT_KG};
use crate::models::{
    exercise_key, ExercisePlanTarget, ExerciseSetRecord, ExerciseTag, ExperienceLevel, SetPrescription, SetTarget,
    WeightUnit,
};
use crate::readiness::{clip, ReadinessFlag, ReadinessResult, ReadinessSettings};

/// Highest overload multiplier allowed for beginners
pub const BEGINNER_MAX_MULTIPLIER: f64 = 1.05;

/// Load lost per subsequent set
const FATIGUE_STEP: f64 = 0.05;

/// Extra rest per subsequent set (seconds)
const REST_STEP_SECONDS: u32 = 15;

/// Largest rep change allowed for endurance work or high-rep sets
const HIGH_REP_MAX_CHANGE: i64 = 2;

/// Target reps above which a set counts as high-rep
const HIGH_REP_THRESHOLD: u32 = 15;

/// Prescription settings, configurable through the engine config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrescriptionSettings {
    /// Weight increment used when the request does not supply one
    pub default_increment_kg: f64,
    /// Sessions of history consulted per exercise
    pub max_history_sessions: usize,
    /// Sets consulted per historical session
    pub max_history_sets: usize,
    /// Chance reported by the conservative low-readiness response
    pub unsafe_session_chance: f64,
}

impl Default for PrescriptionSettings {
    fn default() -> Self {
        PrescriptionSettings {
            default_increment_kg: DEFAULT_INCREMENT_KG,
            max_history_sessions: 2,
            max_history_sets: 12,
            unsafe_session_chance: 0.3,
        }
    }
}

/// Everything needed to prescribe one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRequest {
    /// Readiness score in [0, 1]
    pub rho: f64,
    #[serde(default)]
    pub experience_level: ExperienceLevel,
    pub targets: Vec<ExercisePlanTarget>,
    /// Previously performed sets for the targeted exercises
    #[serde(default)]
    pub history: Vec<ExerciseSetRecord>,
    /// Best session volume (kg) per exercise name or id
    #[serde(default)]
    pub prior_bests: BTreeMap<String, f64>,
    #[serde(default)]
    pub min_increment_kg: Option<f64>,
    /// Unit for history records that carry none
    #[serde(default)]
    pub default_weight_unit: WeightUnit,
}

/// Prescription for one exercise of the session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseRecommendation {
    pub exercise_id: String,
    pub name: String,
    pub sets: Vec<SetPrescription>,
    /// Σ weight × target reps over sets with both values
    pub planned_volume: Option<f64>,
    /// Best previous volume the chance is measured against
    pub best_volume: Option<f64>,
    pub predicted_chance: f64,
    pub plateau_detected: bool,
}

/// Result of prescribing a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecommendation {
    pub rho: f64,
    pub overload_multiplier: f64,
    pub per_exercise: Vec<ExerciseRecommendation>,
    pub session_predicted_chance: f64,
    pub flags: BTreeSet<ReadinessFlag>,
    pub warnings: Vec<String>,
}

impl SessionRecommendation {
    pub fn is_conservative(&self) -> bool {
        self.flags.contains(&ReadinessFlag::UnsafeReadiness)
    }
}

/// Readiness-driven overload multiplier
pub fn overload_multiplier(rho: f64, experience: ExperienceLevel) -> f64 {
    let delta = clip(1.0 + 0.3 * (rho - 0.5), 0.9, 1.1);
    match experience {
        ExperienceLevel::Beginner => delta.min(BEGINNER_MAX_MULTIPLIER),
        _ => delta,
    }
}

/// Load multiplier for the `set_index`-th set (0-based).
///
/// 1.0, 0.95, 0.90 for the first three sets; later sets continue the same
/// linear step and bottom out at zero.
pub fn fatigue_multiplier(set_index: usize) -> f64 {
    (1.0 - FATIGUE_STEP * set_index as f64).max(0.0)
}

/// Rest before the `set_index`-th set, by readiness tier
pub fn rest_seconds(rho: f64, set_index: usize) -> u32 {
    let base = if rho > 0.7 {
        120
    } else if rho > 0.5 {
        150
    } else {
        180
    };
    base + REST_STEP_SECONDS * set_index as u32
}

/// Chance of beating the previous best volume
pub fn success_probability(rho: f64, planned_volume: Option<f64>, best_volume: Option<f64>) -> f64 {
    let gamma = match (planned_volume, best_volume) {
        (Some(planned), Some(best)) => (planned / best.max(1.0)).max(0.1),
        _ => 1.0,
    };
    clip(0.5 + 0.35 * (rho - 0.5) + 0.15 * gamma.ln(), 0.05, 0.98)
}

/// One historical session of one exercise
#[derive(Debug, Clone)]
struct HistorySession {
    date: NaiveDate,
    volume_kg: f64,
    best_one_rm_kg: Option<f64>,
    top_set: Option<(f64, u32)>,
}

/// Recent history of one exercise, newest session first
#[derive(Debug, Clone, Default)]
struct ExerciseHistory {
    recent: Vec<HistorySession>,
    best_volume_kg: Option<f64>,
}

impl ExerciseHistory {
    fn build(records: &[&ExerciseSetRecord], unit: WeightUnit, settings: &PrescriptionSettings) -> Self {
        let mut by_date: BTreeMap<NaiveDate, Vec<&ExerciseSetRecord>> = BTreeMap::new();
        for record in records {
            by_date.entry(record.workout_date).or_default().push(*record);
        }

        let sessions: Vec<HistorySession> = by_date
            .into_iter()
            .rev()
            .map(|(date, sets)| {
                let volume_kg = sets.iter().map(|s| s.volume_load_kg(unit)).sum();
                let considered = &sets[..sets.len().min(settings.max_history_sets)];
                let best_one_rm_kg = considered
                    .iter()
                    .filter_map(|s| s.one_rm_kg(unit))
                    .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))));
                let top_set = considered
                    .iter()
                    .filter_map(|s| Some((s.weight_kg(unit)?, s.reps?)))
                    .fold(None, |acc: Option<(f64, u32)>, set| match acc {
                        Some(best) if best.0 >= set.0 => Some(best),
                        _ => Some(set),
                    });
                HistorySession {
                    date,
                    volume_kg,
                    best_one_rm_kg,
                    top_set,
                }
            })
            .collect();

        let best_volume_kg = sessions
            .iter()
            .map(|s| s.volume_kg)
            .filter(|v| *v > 0.0)
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))));

        ExerciseHistory {
            recent: sessions.into_iter().take(settings.max_history_sessions).collect(),
            best_volume_kg,
        }
    }

    fn plateau_detected(&self) -> bool {
        if self.recent.len() < 2 {
            return false;
        }
        let series: Option<Vec<f64>> = self.recent.iter().rev().map(|s| s.best_one_rm_kg).collect();
        series.is_some_and(|s| formulas::detect_plateau(&s))
    }

    fn reference_note(&self) -> Option<String> {
        if self.plateau_detected() {
            return Some(format!(
                "plateau detected: estimated 1RM flat across the last {} sessions",
                self.recent.len()
            ));
        }
        let last = self.recent.first()?;
        match last.top_set {
            Some((weight, reps)) => Some(format!(
                "last session {}: top set {} kg × {}",
                last.date.format("%Y-%m-%d"),
                formulas::round_to_places(weight, 2),
                reps
            )),
            None => Some(format!(
                "last session {}: {} kg total volume",
                last.date.format("%Y-%m-%d"),
                formulas::round_to_places(last.volume_kg, 2)
            )),
        }
    }
}

fn validate_request(request: &SessionRequest) -> std::result::Result<(), ValidationError> {
    ValidationError::check_range("rho", request.rho, 0.0, 1.0)?;
    if let Some(increment) = request.min_increment_kg {
        if !increment.is_finite() || increment <= 0.0 {
            return Err(ValidationError::InvalidIncrement { value: increment });
        }
    }
    for target in &request.targets {
        for set in &target.sets {
            if let Some(weight) = set.target_weight_kg {
                ValidationError::check_range("target_weight_kg", weight, 0.0, f64::MAX)?;
            }
            if let Some(rpe) = set.target_rpe {
                ValidationError::check_range("target_rpe", rpe, 1.0, 10.0)?;
            }
        }
    }
    for (name, best) in &request.prior_bests {
        ValidationError::check_range(&format!("prior_bests[{}]", name), *best, 0.0, f64::MAX)?;
    }
    Ok(())
}

/// Move reps by at most one so effort stays near the target RPE
fn nudge_reps_for_rpe(reps: u32, target_rpe: Option<f64>, new_weight: f64, target_weight: f64) -> u32 {
    match target_rpe {
        Some(rpe) if new_weight > target_weight && rpe >= 8.5 => reps.saturating_sub(1).max(1),
        Some(rpe) if new_weight < target_weight && rpe <= 7.0 => reps + 1,
        _ => reps,
    }
}

/// Session prescription engine
pub struct SessionPrescriber {
    settings: PrescriptionSettings,
    unsafe_threshold: f64,
}

impl SessionPrescriber {
    /// Create a prescriber with default settings
    pub fn new() -> Self {
        SessionPrescriber {
            settings: PrescriptionSettings::default(),
            unsafe_threshold: ReadinessSettings::default().unsafe_threshold,
        }
    }

    /// Create a prescriber with custom settings
    pub fn with_config(settings: PrescriptionSettings, readiness: &ReadinessSettings) -> Self {
        SessionPrescriber {
            settings,
            unsafe_threshold: readiness.unsafe_threshold,
        }
    }

    /// Prescribe a session from a computed readiness result, carrying its flags
    pub fn prescribe_with_readiness(
        &self,
        readiness: &ReadinessResult,
        request: &SessionRequest,
    ) -> Result<SessionRecommendation> {
        let mut request = request.clone();
        request.rho = readiness.rho;
        let mut recommendation = self.prescribe(&request)?;
        recommendation.flags.extend(readiness.flags.iter().copied());
        Ok(recommendation)
    }

    /// Prescribe a session
    #[instrument(skip_all, fields(rho = request.rho, exercises = request.targets.len()))]
    pub fn prescribe(&self, request: &SessionRequest) -> Result<SessionRecommendation> {
        validate_request(request)?;

        let rho = request.rho;
        if rho < self.unsafe_threshold {
            warn!(rho, threshold = self.unsafe_threshold, "Readiness below safe threshold, no overload");
            return Ok(self.conservative_response(rho));
        }

        let increment = request.min_increment_kg.unwrap_or(self.settings.default_increment_kg);
        let delta = overload_multiplier(rho, request.experience_level);
        debug!(rho, delta, increment, "Overload multiplier");

        let mut histories: HashMap<String, Vec<&ExerciseSetRecord>> = HashMap::new();
        for record in &request.history {
            histories.entry(record.key()).or_default().push(record);
        }
        let prior_bests: HashMap<String, f64> = request
            .prior_bests
            .iter()
            .map(|(name, best)| (exercise_key(name), *best))
            .collect();

        let mut warnings = Vec::new();
        let per_exercise: Vec<ExerciseRecommendation> = request
            .targets
            .iter()
            .map(|target| {
                let records = histories.get(&exercise_key(&target.name)).map(Vec::as_slice).unwrap_or(&[]);
                let history = ExerciseHistory::build(records, request.default_weight_unit, &self.settings);
                let explicit_best = prior_bests
                    .get(&exercise_key(&target.exercise_id))
                    .or_else(|| prior_bests.get(&exercise_key(&target.name)))
                    .copied();
                self.prescribe_exercise(target, rho, delta, increment, &history, explicit_best, &mut warnings)
            })
            .collect();

        let session_predicted_chance = session_probability(rho, &per_exercise);
        info!(
            exercises = per_exercise.len(),
            delta,
            chance = session_predicted_chance,
            "Generated session prescription"
        );

        Ok(SessionRecommendation {
            rho,
            overload_multiplier: delta,
            per_exercise,
            session_predicted_chance,
            flags: BTreeSet::new(),
            warnings,
        })
    }

    fn conservative_response(&self, rho: f64) -> SessionRecommendation {
        SessionRecommendation {
            rho,
            overload_multiplier: 1.0,
            per_exercise: Vec::new(),
            session_predicted_chance: self.settings.unsafe_session_chance,
            flags: BTreeSet::from([ReadinessFlag::UnsafeReadiness]),
            warnings: vec![format!(
                "Readiness {:.2} is below {:.2}; no overload prescribed. Keep today light or rest.",
                rho, self.unsafe_threshold
            )],
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn prescribe_exercise(
        &self,
        target: &ExercisePlanTarget,
        rho: f64,
        delta: f64,
        increment: f64,
        history: &ExerciseHistory,
        explicit_best: Option<f64>,
        warnings: &mut Vec<String>,
    ) -> ExerciseRecommendation {
        let reference = history.reference_note();
        let sets: Vec<SetPrescription> = target
            .sets
            .iter()
            .enumerate()
            .map(|(i, set)| self.prescribe_set(target, set, i, rho, delta, increment, reference.as_deref(), warnings))
            .collect();

        let planned: Vec<f64> = target
            .sets
            .iter()
            .zip(&sets)
            .filter_map(|(set, prescribed)| Some(prescribed.suggested_weight_kg? * set.target_reps? as f64))
            .filter(|v| v.is_finite())
            .collect();
        let planned_volume = if planned.is_empty() {
            None
        } else {
            Some(formulas::round_to_places(planned.iter().sum(), 2))
        };

        let best_volume = match (explicit_best, history.best_volume_kg) {
            (Some(best), _) => Some(best),
            (None, Some(derived)) => {
                warnings.push(format!(
                    "{}: no prior best supplied, using best logged session volume {} kg",
                    target.name,
                    formulas::round_to_places(derived, 2)
                ));
                Some(derived)
            }
            (None, None) => {
                warnings.push(format!(
                    "{}: no prior best volume, chance estimate uses neutral volume ratio",
                    target.name
                ));
                None
            }
        };

        ExerciseRecommendation {
            exercise_id: target.exercise_id.clone(),
            name: target.name.clone(),
            sets,
            planned_volume,
            best_volume,
            predicted_chance: success_probability(rho, planned_volume, best_volume),
            plateau_detected: history.plateau_detected(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn prescribe_set(
        &self,
        target: &ExercisePlanTarget,
        set: &SetTarget,
        index: usize,
        rho: f64,
        delta: f64,
        increment: f64,
        reference: Option<&str>,
        warnings: &mut Vec<String>,
    ) -> SetPrescription {
        let fatigue = fatigue_multiplier(index);
        let rest = rest_seconds(rho, index);
        let mut rationale = Vec::new();

        let (weight, reps) = match (set.target_weight_kg, set.target_reps) {
            (Some(target_weight), target_reps) if target_weight > 0.0 => {
                let weight = formulas::round_to_increment(target_weight * delta * fatigue, increment);
                rationale.push(format!(
                    "load {} kg → {} kg (readiness ×{:.3})",
                    formulas::round_to_places(target_weight, 2),
                    weight,
                    delta
                ));
                let reps = match target_reps {
                    Some(r) => {
                        let nudged = nudge_reps_for_rpe(r, set.target_rpe, weight, target_weight);
                        if nudged != r {
                            rationale.push(format!(
                                "reps {:+} to hold RPE {}",
                                nudged as i64 - r as i64,
                                set.target_rpe.unwrap_or_default()
                            ));
                        }
                        Some(nudged)
                    }
                    None => {
                        warnings.push(format!("{} set {}: no target reps, reps left open", target.name, set.set_id));
                        None
                    }
                };
                (Some(weight), reps)
            }
            (_, Some(target_reps)) => {
                let scaled = (target_reps as f64 * delta * fatigue).round() as i64;
                let mut change = scaled - target_reps as i64;
                if target.has_tag(ExerciseTag::Endurance) || target_reps > HIGH_REP_THRESHOLD {
                    change = change.clamp(-HIGH_REP_MAX_CHANGE, HIGH_REP_MAX_CHANGE);
                }
                let reps = (target_reps as i64 + change).max(0) as u32;
                rationale.push(format!("bodyweight reps {} → {}", target_reps, reps));
                (None, Some(reps))
            }
            _ => {
                warnings.push(format!(
                    "{} set {}: no target weight or reps, nothing to prescribe",
                    target.name, set.set_id
                ));
                (None, None)
            }
        };

        if index > 0 {
            rationale.push(format!(
                "fatigue adjustment -{}% for set {}",
                ((1.0 - fatigue) * 100.0).round(),
                index + 1
            ));
        }
        rationale.push(format!("rest {}s", rest));
        if let Some(reference) = reference {
            rationale.push(reference.to_string());
        }

        SetPrescription {
            set_id: set.set_id.clone(),
            suggested_weight_kg: weight,
            suggested_reps: reps,
            suggested_rest_seconds: Some(rest),
            rationale: rationale.join("; "),
        }
    }
}

impl Default for SessionPrescriber {
    fn default() -> Self {
        Self::new()
    }
}

/// Volume-weighted mean of per-exercise chances when every exercise has a
/// planned volume, arithmetic mean otherwise
fn session_probability(rho: f64, per_exercise: &[ExerciseRecommendation]) -> f64 {
    if per_exercise.is_empty() {
        return success_probability(rho, None, None);
    }

    let volumes: Option<Vec<f64>> = per_exercise
        .iter()
        .map(|e| e.planned_volume.filter(|v| *v > 0.0))
        .collect();

    match volumes {
        Some(volumes) => {
            let total: f64 = volumes.iter().sum();
            per_exercise
                .iter()
                .zip(&volumes)
                .map(|(e, v)| e.predicted_chance * v)
                .sum::<f64>()
                / total
        }
        None => per_exercise.iter().map(|e| e.predicted_chance).sum::<f64>() / per_exercise.len() as f64,
    }
}

/// Prescribe a session with default settings
pub fn generate_session_prescription(request: &SessionRequest) -> Result<SessionRecommendation> {
    SessionPrescriber::new().prescribe(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LiftRxError;

    fn weighted_target(weight: f64, reps: u32, sets: usize) -> ExercisePlanTarget {
        ExercisePlanTarget {
            exercise_id: "ex-bench".to_string(),
            name: "Bench Press".to_string(),
            tags: BTreeSet::from([ExerciseTag::Strength]),
            sets: (0..sets)
                .map(|i| SetTarget {
                    set_id: format!("s{}", i + 1),
                    target_reps: Some(reps),
                    target_weight_kg: Some(weight),
                    target_rpe: None,
                })
                .collect(),
        }
    }

    fn bodyweight_target(reps: u32, tags: &[ExerciseTag]) -> ExercisePlanTarget {
        ExercisePlanTarget {
            exercise_id: "ex-pushup".to_string(),
            name: "Push Up".to_string(),
            tags: tags.iter().copied().collect(),
            sets: vec![SetTarget {
                set_id: "s1".to_string(),
                target_reps: Some(reps),
                target_weight_kg: None,
                target_rpe: None,
            }],
        }
    }

    fn request(rho: f64, targets: Vec<ExercisePlanTarget>) -> SessionRequest {
        SessionRequest {
            rho,
            experience_level: ExperienceLevel::Intermediate,
            targets,
            history: Vec::new(),
            prior_bests: BTreeMap::new(),
            min_increment_kg: None,
            default_weight_unit: WeightUnit::Kg,
        }
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    #[test]
    fn test_overload_multiplier() {
        assert!((overload_multiplier(0.5, ExperienceLevel::Intermediate) - 1.0).abs() < 1e-12);
        assert!((overload_multiplier(0.8, ExperienceLevel::Advanced) - 1.09).abs() < 1e-12);
        assert_eq!(overload_multiplier(1.0, ExperienceLevel::Advanced), 1.1);
        assert_eq!(overload_multiplier(1.0, ExperienceLevel::Beginner), 1.05);
        assert_eq!(overload_multiplier(0.0, ExperienceLevel::Intermediate), 0.9);
    }

    #[test]
    fn test_fatigue_multiplier() {
        assert_eq!(fatigue_multiplier(0), 1.0);
        assert!((fatigue_multiplier(1) - 0.95).abs() < 1e-12);
        assert!((fatigue_multiplier(2) - 0.90).abs() < 1e-12);
        // Sets past the third continue the same linear step; this range is
        // an extrapolation rather than an observed pattern.
        assert!((fatigue_multiplier(3) - 0.85).abs() < 1e-12);
        assert_eq!(fatigue_multiplier(40), 0.0);
    }

    #[test]
    fn test_rest_tiers() {
        assert_eq!(rest_seconds(0.8, 0), 120);
        assert_eq!(rest_seconds(0.6, 0), 150);
        assert_eq!(rest_seconds(0.5, 0), 180);
        assert_eq!(rest_seconds(0.8, 2), 150);
    }

    #[test]
    fn test_unsafe_readiness_returns_conservative_response() {
        let result = generate_session_prescription(&request(0.2, vec![weighted_target(100.0, 5, 3)])).unwrap();

        assert_eq!(result.overload_multiplier, 1.0);
        assert!(result.per_exercise.is_empty());
        assert!(result.flags.contains(&ReadinessFlag::UnsafeReadiness));
        assert_eq!(result.session_predicted_chance, 0.3);
        assert!(result.is_conservative());
    }

    #[test]
    fn test_weighted_sets_with_fatigue() {
        let result = generate_session_prescription(&request(0.8, vec![weighted_target(100.0, 5, 3)])).unwrap();
        let sets = &result.per_exercise[0].sets;

        // Δ = 1.09: 109 → 110, 103.55 → 102.5, 98.1 → 97.5
        assert_eq!(sets[0].suggested_weight_kg, Some(110.0));
        assert_eq!(sets[1].suggested_weight_kg, Some(102.5));
        assert_eq!(sets[2].suggested_weight_kg, Some(97.5));
        assert!(sets.iter().all(|s| s.suggested_reps == Some(5)));
        assert_eq!(sets[0].suggested_rest_seconds, Some(120));
        assert_eq!(sets[2].suggested_rest_seconds, Some(150));

        assert!(!sets[0].rationale.contains("fatigue"));
        assert!(sets[1].rationale.contains("fatigue adjustment -5%"));
        assert!(sets[2].rationale.contains("fatigue adjustment -10%"));
        assert!(sets[2].rationale.contains("rest 150s"));

        assert_eq!(result.per_exercise[0].planned_volume, Some(1550.0));
    }

    #[test]
    fn test_custom_increment() {
        let mut req = request(0.8, vec![weighted_target(100.0, 5, 1)]);
        req.min_increment_kg = Some(1.0);
        let result = generate_session_prescription(&req).unwrap();
        assert_eq!(result.per_exercise[0].sets[0].suggested_weight_kg, Some(109.0));
    }

    #[test]
    fn test_rpe_nudge_is_at_most_one_rep() {
        let mut target = weighted_target(100.0, 5, 2);
        target.sets[0].target_rpe = Some(9.0);
        target.sets[1].target_rpe = Some(6.0);
        let result = generate_session_prescription(&request(0.8, vec![target])).unwrap();
        let sets = &result.per_exercise[0].sets;

        // Heavier than planned at RPE 9 → one rep fewer
        assert_eq!(sets[0].suggested_reps, Some(4));
        // Set 2 is 102.5 kg (> 100) at RPE 6 → unchanged
        assert_eq!(sets[1].suggested_reps, Some(5));
    }

    #[test]
    fn test_bodyweight_reps() {
        let result = generate_session_prescription(&request(1.0, vec![bodyweight_target(10, &[])])).unwrap();
        // 10 × 1.1 = 11
        assert_eq!(result.per_exercise[0].sets[0].suggested_reps, Some(11));
        assert_eq!(result.per_exercise[0].sets[0].suggested_weight_kg, None);
        assert_eq!(result.per_exercise[0].planned_volume, None);
    }

    #[test]
    fn test_high_rep_change_is_capped() {
        // 30 × 1.1 = 33, capped to +2
        let result = generate_session_prescription(&request(1.0, vec![bodyweight_target(30, &[])])).unwrap();
        assert_eq!(result.per_exercise[0].sets[0].suggested_reps, Some(32));

        // Endurance tag caps even low rep targets: 12 × 0.9 = 10.8 → 11 (within cap)
        let result = generate_session_prescription(&request(0.35, vec![bodyweight_target(12, &[ExerciseTag::Endurance])]))
            .unwrap();
        let reps = result.per_exercise[0].sets[0].suggested_reps.unwrap();
        assert!((10..=14).contains(&reps));
    }

    #[test]
    fn test_missing_targets_degrade_to_none() {
        let target = ExercisePlanTarget {
            exercise_id: "ex-plank".to_string(),
            name: "Plank".to_string(),
            tags: BTreeSet::new(),
            sets: vec![SetTarget {
                set_id: "s1".to_string(),
                target_reps: None,
                target_weight_kg: None,
                target_rpe: None,
            }],
        };
        let result = generate_session_prescription(&request(0.7, vec![target])).unwrap();
        let set = &result.per_exercise[0].sets[0];

        assert_eq!(set.suggested_weight_kg, None);
        assert_eq!(set.suggested_reps, None);
        assert!(result.warnings.iter().any(|w| w.contains("nothing to prescribe")));
    }

    #[test]
    fn test_probability_uses_prior_best() {
        let mut req = request(0.8, vec![weighted_target(100.0, 5, 3)]);
        req.prior_bests.insert("bench press".to_string(), 1500.0);
        let result = generate_session_prescription(&req).unwrap();
        let exercise = &result.per_exercise[0];

        let expected = 0.5 + 0.35 * 0.3 + 0.15 * (1550.0f64 / 1500.0).ln();
        assert!((exercise.predicted_chance - expected).abs() < 1e-9);
        assert_eq!(exercise.best_volume, Some(1500.0));
        assert!((result.session_predicted_chance - expected).abs() < 1e-9);
    }

    #[test]
    fn test_probability_without_best_is_neutral() {
        let result = generate_session_prescription(&request(0.6, vec![weighted_target(80.0, 8, 3)])).unwrap();
        let expected = 0.5 + 0.35 * 0.1;
        assert!((result.per_exercise[0].predicted_chance - expected).abs() < 1e-9);
        assert!(result.warnings.iter().any(|w| w.contains("no prior best")));
    }

    #[test]
    fn test_probability_bounds() {
        assert_eq!(success_probability(1.0, Some(1_000_000.0), Some(10.0)), 0.98);
        // γ floors at 0.1 and the result floors at 0.05
        assert_eq!(success_probability(0.0, Some(0.0), Some(1000.0)), 0.05);
        let floored = success_probability(0.5, Some(0.0), Some(1000.0));
        assert!((floored - (0.5 + 0.15 * 0.1f64.ln())).abs() < 1e-9);
    }

    #[test]
    fn test_session_probability_is_volume_weighted() {
        let mut squat = weighted_target(140.0, 5, 3);
        squat.exercise_id = "ex-squat".to_string();
        squat.name = "Squat".to_string();

        let mut req = request(0.7, vec![weighted_target(100.0, 5, 3), squat]);
        req.prior_bests.insert("Bench Press".to_string(), 2000.0);
        req.prior_bests.insert("Squat".to_string(), 1800.0);
        let result = generate_session_prescription(&req).unwrap();

        let (a, b) = (&result.per_exercise[0], &result.per_exercise[1]);
        let (va, vb) = (a.planned_volume.unwrap(), b.planned_volume.unwrap());
        let expected = (a.predicted_chance * va + b.predicted_chance * vb) / (va + vb);
        assert!((result.session_predicted_chance - expected).abs() < 1e-9);
    }

    #[test]
    fn test_history_reference_and_plateau() {
        let mut req = request(0.8, vec![weighted_target(100.0, 5, 1)]);
        req.history = vec![
            ExerciseSetRecord::new("Bench Press", Some(100.0), Some(5), 3, None, date(1)),
            ExerciseSetRecord::new("bench press", Some(100.0), Some(5), 3, None, date(4)),
        ];
        let result = generate_session_prescription(&req).unwrap();
        let exercise = &result.per_exercise[0];

        assert!(exercise.plateau_detected);
        assert!(exercise.sets[0].rationale.contains("plateau detected"));
        // Best volume falls back to the logged history
        assert_eq!(exercise.best_volume, Some(1500.0));
        assert!(result.warnings.iter().any(|w| w.contains("best logged session volume")));
    }

    #[test]
    fn test_history_reference_last_session() {
        let mut req = request(0.8, vec![weighted_target(100.0, 5, 1)]);
        req.history = vec![
            ExerciseSetRecord::new("Bench Press", Some(95.0), Some(5), 3, None, date(1)),
            ExerciseSetRecord::new("Bench Press", Some(100.0), Some(5), 3, None, date(4)),
        ];
        let result = generate_session_prescription(&req).unwrap();
        let rationale = &result.per_exercise[0].sets[0].rationale;

        assert!(!result.per_exercise[0].plateau_detected);
        assert!(rationale.contains("last session 2024-05-04: top set 100 kg × 5"));
    }

    #[test]
    fn test_prescribe_with_readiness_merges_flags() {
        let readiness = ReadinessResult {
            rho: 0.2,
            flags: BTreeSet::from([ReadinessFlag::LowEnergy, ReadinessFlag::ManualWellnessInput]),
        };
        let result = SessionPrescriber::new()
            .prescribe_with_readiness(&readiness, &request(0.9, vec![weighted_target(100.0, 5, 3)]))
            .unwrap();

        assert_eq!(result.overload_multiplier, 1.0);
        assert!(result.flags.contains(&ReadinessFlag::UnsafeReadiness));
        assert!(result.flags.contains(&ReadinessFlag::LowEnergy));
    }

    #[test]
    fn test_validation_errors() {
        let err = generate_session_prescription(&request(f64::NAN, vec![])).unwrap_err();
        assert!(matches!(err, LiftRxError::Validation(ValidationError::NonFinite { .. })));

        let mut req = request(0.7, vec![]);
        req.min_increment_kg = Some(0.0);
        let err = generate_session_prescription(&req).unwrap_err();
        assert!(matches!(err, LiftRxError::Validation(ValidationError::InvalidIncrement { .. })));

        let err = generate_session_prescription(&request(0.7, vec![weighted_target(-20.0, 5, 1)])).unwrap_err();
        assert!(matches!(err, LiftRxError::Validation(ValidationError::OutOfRange { .. })));
    }

    #[test]
    fn test_empty_session_has_base_chance() {
        let result = generate_session_prescription(&request(0.5, vec![])).unwrap();
        assert!(result.per_exercise.is_empty());
        assert!((result.session_predicted_chance - 0.5).abs() < 1e-12);
        assert!(!result.is_conservative());
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn test_beginner_multiplier_never_exceeds_cap(rho in 0.0f64..=1.0) {
            prop_assert!(overload_multiplier(rho, ExperienceLevel::Beginner) <= BEGINNER_MAX_MULTIPLIER);
        }

        #[test]
        fn test_unsafe_rho_never_overloads(rho in 0.0f64..0.35) {
            let result = generate_session_prescription(&request(rho, vec![weighted_target(100.0, 5, 3)])).unwrap();
            prop_assert_eq!(result.overload_multiplier, 1.0);
            prop_assert!(result.per_exercise.is_empty());
        }

        #[test]
        fn test_suggestions_are_non_negative_multiples(rho in 0.35f64..=1.0, weight in 0.5f64..300.0, sets in 1usize..8) {
            let result = generate_session_prescription(&request(rho, vec![weighted_target(weight, 8, sets)])).unwrap();
            for set in &result.per_exercise[0].sets {
                let w = set.suggested_weight_kg.unwrap();
                prop_assert!(w >= 0.0);
                let steps = w / 2.5;
                prop_assert!((steps - steps.round()).abs() < 1e-9);
            }
            let p = result.session_predicted_chance;
            prop_assert!((0.05..=0.98).contains(&p));
        }
    }
}
