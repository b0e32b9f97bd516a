use chrono::NaiveDate;
use std::collections::BTreeMap;
use tempfile::tempdir;

use liftrx::export::{self, ExportFormat};
use liftrx::readiness::{DeviceReadinessInput, ManualReadinessInput, ReadinessFlag};
use liftrx::training_plan::PeriodizationModel;
use liftrx::{
    ContextAggregator, EngineConfig, ExercisePlanTarget, ExerciseSetRecord, ExperienceLevel, HistoryStore,
    PlanGenerator, ReadinessCalculator, ReadinessInput, SessionPrescriber, SessionRequest, SetTarget,
    TargetType, UserPreferences, WeekType, WeightUnit,
};

/// Integration tests covering complete engine workflows

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn bench_target(weight: f64, reps: u32, sets: usize) -> ExercisePlanTarget {
    ExercisePlanTarget {
        exercise_id: "ex-bench".to_string(),
        name: "Bench Press".to_string(),
        tags: Default::default(),
        sets: (1..=sets)
            .map(|i| SetTarget {
                set_id: format!("s{}", i),
                target_reps: Some(reps),
                target_weight_kg: Some(weight),
                target_rpe: None,
            })
            .collect(),
    }
}

fn session_request(targets: Vec<ExercisePlanTarget>) -> SessionRequest {
    SessionRequest {
        rho: 0.5,
        experience_level: ExperienceLevel::Intermediate,
        targets,
        history: Vec::new(),
        prior_bests: BTreeMap::new(),
        min_increment_kg: None,
        default_weight_unit: WeightUnit::Kg,
    }
}

fn logged_sets(day: NaiveDate, bench: f64, squat: f64) -> Vec<ExerciseSetRecord> {
    vec![
        ExerciseSetRecord::new("Bench Press", Some(bench), Some(5), 3, Some(WeightUnit::Kg), day),
        ExerciseSetRecord::new("Squat", Some(squat), Some(5), 3, Some(WeightUnit::Kg), day),
    ]
}

#[test]
fn test_device_readiness_to_prescription() {
    let readiness = ReadinessCalculator::new()
        .compute(&ReadinessInput::Device(DeviceReadinessInput {
            recovery_score: Some(80.0),
            sleep_performance: Some(90.0),
            hrv_now: Some(60.0),
            hrv_baseline: Some(50.0),
            rhr_now: Some(50.0),
            rhr_baseline: Some(55.0),
            yesterday_strain: Some(10.0),
        }))
        .unwrap();

    // 0.4×0.8 + 0.3×0.9 + 0.15×1.2 + 0.15×1.1
    assert!((readiness.rho - 0.935).abs() < 1e-9);
    assert!(readiness.has_flag(ReadinessFlag::GoodRecovery));
    assert!(readiness.has_flag(ReadinessFlag::GoodSleep));

    let request = session_request(vec![bench_target(100.0, 5, 3)]);
    let recommendation = SessionPrescriber::new()
        .prescribe_with_readiness(&readiness, &request)
        .unwrap();

    assert_eq!(recommendation.overload_multiplier, 1.1);
    let bench = &recommendation.per_exercise[0];
    let weights: Vec<Option<f64>> = bench.sets.iter().map(|s| s.suggested_weight_kg).collect();
    assert_eq!(weights, vec![Some(110.0), Some(105.0), Some(100.0)]);
    let rests: Vec<Option<u32>> = bench.sets.iter().map(|s| s.suggested_rest_seconds).collect();
    assert_eq!(rests, vec![Some(120), Some(135), Some(150)]);

    // Readiness flags travel with the prescription
    assert!(recommendation.flags.contains(&ReadinessFlag::GoodRecovery));
    assert!(!recommendation.is_conservative());
    assert!(recommendation.session_predicted_chance > 0.05);
    assert!(recommendation.session_predicted_chance < 0.98);
}

#[test]
fn test_low_manual_readiness_blocks_overload() {
    let readiness = ReadinessCalculator::new()
        .compute(&ReadinessInput::Manual(ManualReadinessInput {
            energy_level: 2,
            sleep_quality: 2,
            notes: Some("Feeling sick and stressed".to_string()),
            device: None,
        }))
        .unwrap();

    assert!((readiness.rho - 0.28).abs() < 1e-9);
    assert!(readiness.has_flag(ReadinessFlag::IllnessNoted));

    let request = session_request(vec![bench_target(100.0, 5, 3)]);
    let recommendation = SessionPrescriber::new()
        .prescribe_with_readiness(&readiness, &request)
        .unwrap();

    assert!(recommendation.is_conservative());
    assert!(recommendation.per_exercise.is_empty());
    assert_eq!(recommendation.session_predicted_chance, 0.3);
    assert!(recommendation.flags.contains(&ReadinessFlag::ManualWellnessInput));
    assert!(!recommendation.warnings.is_empty());
}

#[test]
fn test_store_context_plan_export_workflow() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("history.db");

    let mut store = HistoryStore::new(&db_path).unwrap();
    for (day, bench, squat) in [
        (date(2024, 5, 6), 100.0, 140.0),
        (date(2024, 5, 13), 102.5, 140.0),
        (date(2024, 5, 20), 105.0, 140.0),
    ] {
        store
            .log_session("u1", Some("t1"), day, logged_sets(day, bench, squat))
            .unwrap();
    }
    // Another user's heavier history must not leak into u1's context
    store
        .log_session("u2", Some("t1"), date(2024, 5, 21), logged_sets(date(2024, 5, 21), 200.0, 250.0))
        .unwrap();
    drop(store);

    // Reopen to make sure everything was persisted
    let store = HistoryStore::new(&db_path).unwrap();
    let preferences = UserPreferences {
        training_days_per_week: Some(2),
        plan_duration_weeks: Some(4),
        goal_preset: Some("strength".to_string()),
        ..Default::default()
    };
    let context = ContextAggregator::new().aggregate(&store, "u1", TargetType::Template, &["t1".to_string()], preferences);

    assert_eq!(context.total_sessions, 3);
    assert_eq!(context.recent_sessions[0].workout_date, date(2024, 5, 20));
    // Brzycki: 105 × 36 / 32
    assert_eq!(context.one_rm_for("bench press"), Some(118.13));
    assert_eq!(context.one_rm_for("SQUAT"), Some(157.5));
    assert_eq!(context.volume_trends["Bench Press"].weekly_volumes.len(), 3);

    let plan = PlanGenerator::new().generate_plan(&context).unwrap();
    assert_eq!(plan.model, PeriodizationModel::Linear);
    assert_eq!(plan.weeks.len(), 4);
    assert_eq!(plan.weeks[3].week_type, WeekType::Deload);

    let week1 = &plan.weeks[0];
    assert_eq!(week1.sessions.len(), 2);
    assert_eq!(week1.sessions[0].exercises[0].exercise_name, "Bench Press");
    assert_eq!(week1.sessions[0].exercises[0].weight, Some(82.5));
    assert_eq!(week1.sessions[1].exercises[0].exercise_name, "Squat");
    assert_eq!(week1.sessions[1].exercises[0].weight, Some(110.0));

    let csv_path = temp_dir.path().join("plan.csv");
    let format = ExportFormat::from_path(&csv_path).unwrap();
    export::export_plan(&plan, format, &csv_path).unwrap();
    let csv = std::fs::read_to_string(&csv_path).unwrap();
    assert_eq!(csv.lines().count(), 1 + 4 * 2);
    assert!(csv.contains("1,training,1,Session 1,Bench Press,3,10,82.5,,,"));

    let json_path = temp_dir.path().join("plan.json");
    export::export_plan(&plan, ExportFormat::Json, &json_path).unwrap();
    let parsed: liftrx::TrainingPlan = serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
    assert_eq!(parsed.id, plan.id);
    assert_eq!(parsed.weeks.len(), 4);
    assert_eq!(parsed.weeks[0].sessions[0].exercises[0].weight, Some(82.5));
}

#[test]
fn test_prescription_uses_logged_history() {
    let temp_dir = tempdir().unwrap();
    let mut store = HistoryStore::new(temp_dir.path().join("history.db")).unwrap();
    store
        .log_session("u1", None, date(2024, 6, 3), logged_sets(date(2024, 6, 3), 100.0, 140.0))
        .unwrap();

    let context = ContextAggregator::new().aggregate(&store, "u1", TargetType::Template, &[], UserPreferences::default());
    let history: Vec<ExerciseSetRecord> = context
        .recent_sessions
        .iter()
        .flat_map(|s| s.sets.iter().cloned())
        .collect();

    let mut request = session_request(vec![bench_target(100.0, 5, 3)]);
    request.rho = 0.6;
    request.history = history;

    let recommendation = SessionPrescriber::new().prescribe(&request).unwrap();
    let bench = &recommendation.per_exercise[0];

    // Best logged volume (3 × 5 × 100) stands in for the missing prior best
    assert_eq!(bench.best_volume, Some(1500.0));
    assert!(recommendation.warnings.iter().any(|w| w.contains("best logged session volume")));
    assert!(bench.sets[0].rationale.contains("last session 2024-06-03"));
}

#[test]
fn test_pounds_logged_session_keeps_its_unit() {
    let temp_dir = tempdir().unwrap();
    let mut store = HistoryStore::new(temp_dir.path().join("history.db")).unwrap();
    let day = date(2024, 7, 1);
    let squat = ExerciseSetRecord::new("Squat", Some(225.0), Some(1), 1, None, day).or_unit(WeightUnit::Lbs);
    let session = store.log_session("u1", None, day, vec![squat]).unwrap();

    let records = store.personal_records("u1", &session, WeightUnit::Lbs).unwrap();
    assert!(records.iter().any(|r| r.exercise_name == "Squat" && r.value == 102.06));

    // The stored unit survives a kg-preferring read
    let context = ContextAggregator::new().aggregate(&store, "u1", TargetType::Template, &[], UserPreferences::default());
    assert_eq!(context.recent_sessions[0].sets[0].unit, Some(WeightUnit::Lbs));
    assert_eq!(context.one_rm_for("squat"), Some(102.06));
}

#[test]
fn test_configured_engine_components() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    std::fs::write(
        &config_path,
        r#"
[readiness]
unsafe_threshold = 0.6

[planner]
default_sessions_per_week = 1
"#,
    )
    .unwrap();

    let config = EngineConfig::load_from_file(&config_path).unwrap();

    // 0.5 would be safe with defaults but not under this config
    let mut request = session_request(vec![bench_target(100.0, 5, 1)]);
    request.rho = 0.5;
    let recommendation = config.session_prescriber().prescribe(&request).unwrap();
    assert!(recommendation.is_conservative());
    assert!(!config.readiness_calculator().is_safe(0.5));

    let mut context = liftrx::PlaybookGenerationContext::empty("u1", TargetType::Template, &[], UserPreferences::default());
    context.current_one_rm_estimates.insert("Deadlift".to_string(), 200.0);
    let plan = config.plan_generator().generate_plan(&context).unwrap();
    assert_eq!(plan.sessions_per_week, 1);
    assert!(plan.weeks.iter().all(|w| w.sessions.len() == 1));
}
