use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};

use crate::error::Result;
use crate::formulas::{self, PrMetric, SetPerformance, TrendDirection};
use crate::models::{
    exercise_key, ExerciseSetRecord, OneRmEstimateMap, SessionRecord, TargetType, UserPreferences, WeightUnit,
};

/// Upper bound on sessions fetched per context request
pub const MAX_SESSION_BATCH: usize = 100;

/// Source of logged training history.
///
/// Implementations return at most `limit` sessions for the user, newest first,
/// scoped to the given template or master-exercise ids (all sessions when
/// `target_ids` is empty).
pub trait HistoryProvider {
    fn recent_sessions(
        &self,
        user_id: &str,
        target_type: TargetType,
        target_ids: &[String],
        limit: usize,
    ) -> Result<Vec<SessionRecord>>;
}

/// In-memory history, used for JSON inputs and tests
#[derive(Debug, Clone, Default)]
pub struct InMemoryHistory {
    sessions: Vec<(String, SessionRecord)>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_session(&mut self, user_id: impl Into<String>, session: SessionRecord) {
        self.sessions.push((user_id.into(), session));
    }

    pub fn with_sessions(user_id: &str, sessions: impl IntoIterator<Item = SessionRecord>) -> Self {
        let mut history = Self::new();
        for session in sessions {
            history.add_session(user_id, session);
        }
        history
    }
}

/// Whether a session falls inside the requested scope
pub fn session_matches(session: &SessionRecord, target_type: TargetType, target_ids: &[String]) -> bool {
    if target_ids.is_empty() {
        return true;
    }
    match target_type {
        TargetType::Template => session
            .template_id
            .as_ref()
            .is_some_and(|id| target_ids.contains(id)),
        TargetType::MasterExercise => session
            .sets
            .iter()
            .any(|set| set.exercise_id.as_ref().is_some_and(|id| target_ids.contains(id))),
    }
}

impl HistoryProvider for InMemoryHistory {
    fn recent_sessions(
        &self,
        user_id: &str,
        target_type: TargetType,
        target_ids: &[String],
        limit: usize,
    ) -> Result<Vec<SessionRecord>> {
        let mut sessions: Vec<SessionRecord> = self
            .sessions
            .iter()
            .filter(|(owner, session)| owner == user_id && session_matches(session, target_type, target_ids))
            .map(|(_, session)| session.clone())
            .collect();
        sessions.sort_by(|a, b| b.workout_date.cmp(&a.workout_date));
        sessions.truncate(limit);
        Ok(sessions)
    }
}

/// Context aggregation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextSettings {
    /// Sessions fetched per request, clamped to 1..=100
    pub session_batch_size: usize,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self { session_batch_size: 20 }
    }
}

/// Total volume of one ISO week (weeks start on Monday)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyVolume {
    pub week_start: NaiveDate,
    pub volume: f64,
}

/// Weekly volume aggregation of one exercise
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeTrend {
    /// Oldest week first
    pub weekly_volumes: Vec<WeeklyVolume>,
    /// Least-squares slope in kg per week
    pub slope: f64,
    pub direction: TrendDirection,
    /// 0-100, higher is steadier week to week
    pub consistency: u8,
}

/// Everything the planner needs about a user's recent training
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybookGenerationContext {
    pub user_id: String,
    pub target_type: TargetType,
    pub target_ids: Vec<String>,
    /// Newest first
    pub recent_sessions: Vec<SessionRecord>,
    /// Exercise display name → best 1RM in kg
    pub current_one_rm_estimates: OneRmEstimateMap,
    pub volume_trends: BTreeMap<String, VolumeTrend>,
    /// Exercise key → display name
    pub exercise_names: BTreeMap<String, String>,
    pub total_sessions: usize,
    pub preferences: UserPreferences,
    pub warnings: Vec<String>,
}

impl PlaybookGenerationContext {
    /// Context for a user with no history at all
    pub fn empty(user_id: &str, target_type: TargetType, target_ids: &[String], preferences: UserPreferences) -> Self {
        PlaybookGenerationContext {
            user_id: user_id.to_string(),
            target_type,
            target_ids: target_ids.to_vec(),
            recent_sessions: Vec::new(),
            current_one_rm_estimates: OneRmEstimateMap::new(),
            volume_trends: BTreeMap::new(),
            exercise_names: BTreeMap::new(),
            total_sessions: 0,
            preferences,
            warnings: Vec::new(),
        }
    }

    /// 1RM for an exercise by any spelling of its name
    pub fn one_rm_for(&self, name: &str) -> Option<f64> {
        let canonical = self.exercise_names.get(&exercise_key(name))?;
        self.current_one_rm_estimates.get(canonical).copied()
    }

    pub fn has_history(&self) -> bool {
        !self.recent_sessions.is_empty()
    }
}

/// Collects recent history into a planning context
pub struct ContextAggregator {
    settings: ContextSettings,
}

impl ContextAggregator {
    pub fn new() -> Self {
        Self {
            settings: ContextSettings::default(),
        }
    }

    pub fn with_config(settings: ContextSettings) -> Self {
        Self { settings }
    }

    /// Effective batch size after clamping
    pub fn batch_size(&self) -> usize {
        self.settings.session_batch_size.clamp(1, MAX_SESSION_BATCH)
    }

    /// Aggregate a user's recent history. Storage failures degrade to an
    /// empty context with a warning.
    #[instrument(skip_all, fields(user_id = %user_id, target_type = ?target_type))]
    pub fn aggregate(
        &self,
        provider: &dyn HistoryProvider,
        user_id: &str,
        target_type: TargetType,
        target_ids: &[String],
        preferences: UserPreferences,
    ) -> PlaybookGenerationContext {
        let mut context = PlaybookGenerationContext::empty(user_id, target_type, target_ids, preferences);
        let limit = self.batch_size();

        let mut sessions = match provider.recent_sessions(user_id, target_type, target_ids, limit) {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!(user_id, error = %e, "History fetch failed, continuing without history");
                context.warnings.push(format!("Training history unavailable: {}", e));
                Vec::new()
            }
        };
        sessions.sort_by(|a, b| b.workout_date.cmp(&a.workout_date));
        sessions.truncate(limit);

        let unit = context.preferences.weight_unit();
        context.exercise_names = collect_exercise_names(&sessions);
        context.current_one_rm_estimates = one_rm_estimates(&sessions, &context.exercise_names, unit);
        context.volume_trends = volume_trends(&sessions, &context.exercise_names, unit);
        context.total_sessions = sessions.len();
        context.recent_sessions = sessions;

        let overrides = context.preferences.one_rm_overrides.clone();
        for (name, value) in overrides {
            if !value.is_finite() || value <= 0.0 {
                context
                    .warnings
                    .push(format!("Ignoring invalid 1RM override for {}: {}", name, value));
                continue;
            }
            let canonical = context
                .exercise_names
                .entry(exercise_key(&name))
                .or_insert_with(|| name.trim().to_string())
                .clone();
            debug!(exercise = %canonical, value, "Applying 1RM override");
            context.current_one_rm_estimates.insert(canonical, value);
        }

        if context.recent_sessions.is_empty() {
            context.warnings.push("No training history found".to_string());
        }

        info!(
            user_id,
            sessions = context.total_sessions,
            exercises = context.exercise_names.len(),
            "Aggregated training context"
        );
        context
    }
}

impl Default for ContextAggregator {
    fn default() -> Self {
        Self::new()
    }
}

/// First-seen spelling per exercise key, scanning newest session first
fn collect_exercise_names(sessions: &[SessionRecord]) -> BTreeMap<String, String> {
    let mut names = BTreeMap::new();
    for set in sessions.iter().flat_map(|s| &s.sets) {
        let key = set.key();
        if key.is_empty() {
            continue;
        }
        names.entry(key).or_insert_with(|| set.exercise_name.trim().to_string());
    }
    names
}

fn one_rm_estimates(
    sessions: &[SessionRecord],
    names: &BTreeMap<String, String>,
    unit: WeightUnit,
) -> OneRmEstimateMap {
    let mut estimates = OneRmEstimateMap::new();
    for set in sessions.iter().flat_map(|s| &s.sets) {
        let (Some(name), Some(one_rm)) = (names.get(&set.key()), set.one_rm_kg(unit)) else {
            continue;
        };
        let best = estimates.entry(name.clone()).or_insert(0.0);
        if one_rm > *best {
            *best = formulas::round_to_places(one_rm, 2);
        }
    }
    estimates
}

/// Monday of the ISO week containing `date`
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

fn volume_trends(
    sessions: &[SessionRecord],
    names: &BTreeMap<String, String>,
    unit: WeightUnit,
) -> BTreeMap<String, VolumeTrend> {
    let mut weekly: BTreeMap<String, BTreeMap<NaiveDate, f64>> = BTreeMap::new();
    for session in sessions {
        for set in &session.sets {
            let Some(name) = names.get(&set.key()) else {
                continue;
            };
            *weekly
                .entry(name.clone())
                .or_default()
                .entry(week_start(session.workout_date))
                .or_insert(0.0) += set.volume_load_kg(unit);
        }
    }

    weekly
        .into_iter()
        .map(|(name, weeks)| {
            let first = weeks.keys().next().copied();
            let points: Vec<(f64, f64)> = weeks
                .iter()
                .map(|(start, volume)| {
                    let offset = first.map_or(0, |f| (*start - f).num_days() / 7);
                    (offset as f64, *volume)
                })
                .collect();
            let volumes: Vec<f64> = weeks.values().copied().collect();
            let slope = formulas::trend_slope(&points);
            let mean = if volumes.is_empty() { 0.0 } else { volumes.iter().mean() };
            let trend = VolumeTrend {
                weekly_volumes: weeks
                    .into_iter()
                    .map(|(week_start, volume)| WeeklyVolume {
                        week_start,
                        volume: formulas::round_to_places(volume, 2),
                    })
                    .collect(),
                slope: formulas::round_to_places(slope, 2),
                direction: formulas::trend_direction(slope, mean),
                consistency: formulas::consistency_score(&volumes),
            };
            (name, trend)
        })
        .collect()
}

/// Aggregate context with default settings
pub fn aggregate_context(
    provider: &dyn HistoryProvider,
    user_id: &str,
    target_type: TargetType,
    target_ids: &[String],
    preferences: UserPreferences,
) -> PlaybookGenerationContext {
    ContextAggregator::new().aggregate(provider, user_id, target_type, target_ids, preferences)
}

/// A personal record set by a newly logged session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonalRecord {
    pub exercise_name: String,
    pub metric: PrMetric,
    pub value: f64,
    pub previous_best: Option<f64>,
}

const PR_METRICS: [PrMetric; 3] = [PrMetric::Weight, PrMetric::Volume, PrMetric::OneRm];

fn performance_of(set: &ExerciseSetRecord, unit: WeightUnit) -> SetPerformance {
    SetPerformance {
        weight: set.weight_kg(unit).unwrap_or(0.0),
        reps: set.reps.unwrap_or(0),
        sets: set.sets,
    }
}

/// Personal records `session` sets against `history` (which must not include
/// it). Only the best set per exercise and metric is reported.
pub fn find_personal_records(history: &[SessionRecord], session: &SessionRecord, unit: WeightUnit) -> Vec<PersonalRecord> {
    let mut history_bests: BTreeMap<(String, PrMetric), SetPerformance> = BTreeMap::new();
    for set in history.iter().flat_map(|s| &s.sets) {
        let performance = performance_of(set, unit);
        for metric in PR_METRICS {
            let slot = (set.key(), metric);
            if formulas::is_personal_record(&performance, history_bests.get(&slot), metric) {
                history_bests.insert(slot, performance);
            }
        }
    }

    let mut running = history_bests.clone();
    let mut records: BTreeMap<(String, PrMetric), PersonalRecord> = BTreeMap::new();
    for set in &session.sets {
        let current = performance_of(set, unit);
        for metric in PR_METRICS {
            let slot = (set.key(), metric);
            if !formulas::is_personal_record(&current, running.get(&slot), metric) {
                continue;
            }
            records.insert(
                slot.clone(),
                PersonalRecord {
                    exercise_name: set.exercise_name.clone(),
                    metric,
                    value: formulas::round_to_places(current.metric(metric), 2),
                    previous_best: history_bests
                        .get(&slot)
                        .map(|best| formulas::round_to_places(best.metric(metric), 2)),
                },
            );
            running.insert(slot, current);
        }
    }
    records.into_values().collect()
}
