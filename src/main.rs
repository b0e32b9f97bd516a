use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use colored::*;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use tabled::settings::Style;
use tabled::{Table, Tabled};
use tracing::info;

use liftrx::export::{self, ExportFormat};
use liftrx::formulas::round_to_places;
use liftrx::logging::init_logging;
use liftrx::prescription::SessionRecommendation;
use liftrx::{
    EngineConfig, ExerciseSetRecord, HistoryStore, PlaybookGenerationContext, ReadinessInput, SessionRequest,
    TargetType, UserPreferences, WeightUnit,
};

/// liftrx - Strength Training Prescription CLI
///
/// Scores session readiness, prescribes loads for today's session and
/// generates multi-week periodized plans from logged training history.
#[derive(Parser)]
#[command(name = "liftrx")]
#[command(author = "liftrx Contributors")]
#[command(version)]
#[command(about = "Strength training prescription engine", long_about = None)]
struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity of logging
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute readiness from device signals or a wellness check-in
    Readiness {
        /// JSON readiness input ("-" for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Prescribe loads for today's session
    Prescribe {
        /// JSON session request ("-" for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// JSON readiness input; replaces the request's readiness score
        #[arg(short, long)]
        readiness: Option<PathBuf>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Log a performed session into the history database
    LogSession {
        /// SQLite history database
        #[arg(long)]
        db: PathBuf,

        /// User identifier
        #[arg(short, long)]
        user: String,

        /// JSON session log ("-" for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Unit assumed for sets that carry none (kg, lbs)
        #[arg(long, default_value = "kg")]
        unit: String,
    },

    /// Aggregate a user's recent training context
    Context {
        #[command(flatten)]
        scope: ScopeArgs,

        /// Print the full context as JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate a periodized training plan
    Plan {
        #[command(flatten)]
        scope: ScopeArgs,

        /// Output format (text, json, csv); defaults to the output extension, then text
        #[arg(short = 'f', long)]
        format: Option<String>,

        /// Write the plan to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show or initialise the engine configuration
    Config {
        /// Print the active configuration as TOML
        #[arg(short, long)]
        show: bool,

        /// Write a default configuration file
        #[arg(long)]
        init: bool,

        /// Print the configuration file path
        #[arg(short, long)]
        path: bool,
    },
}

/// History scope shared by `context` and `plan`
#[derive(clap::Args)]
struct ScopeArgs {
    /// SQLite history database
    #[arg(long)]
    db: PathBuf,

    /// User identifier
    #[arg(short, long)]
    user: String,

    /// Scope history to templates or master exercises
    #[arg(short, long, default_value = "template")]
    target_type: String,

    /// Template or exercise ids (comma separated); empty means all history
    #[arg(long, value_delimiter = ',')]
    ids: Vec<String>,

    /// JSON user preferences
    #[arg(long)]
    prefs: Option<PathBuf>,
}

/// A performed session as read from the CLI
#[derive(Debug, Deserialize)]
struct SessionLog {
    date: NaiveDate,
    #[serde(default)]
    template_id: Option<String>,
    sets: Vec<LoggedSet>,
}

#[derive(Debug, Deserialize)]
struct LoggedSet {
    exercise_name: String,
    #[serde(default)]
    exercise_id: Option<String>,
    #[serde(default)]
    weight: Option<f64>,
    #[serde(default)]
    reps: Option<u32>,
    #[serde(default = "default_sets")]
    sets: u32,
    #[serde(default)]
    unit: Option<WeightUnit>,
}

fn default_sets() -> u32 {
    1
}

#[derive(Tabled)]
struct SetRow {
    #[tabled(rename = "Exercise")]
    exercise: String,
    #[tabled(rename = "Set")]
    set_id: String,
    #[tabled(rename = "Weight (kg)")]
    weight: String,
    #[tabled(rename = "Reps")]
    reps: String,
    #[tabled(rename = "Rest (s)")]
    rest: String,
    #[tabled(rename = "Rationale")]
    rationale: String,
}

#[derive(Tabled)]
struct ExerciseRow {
    #[tabled(rename = "Exercise")]
    exercise: String,
    #[tabled(rename = "1RM (kg)")]
    one_rm: String,
    #[tabled(rename = "Trend")]
    trend: String,
    #[tabled(rename = "Consistency")]
    consistency: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = EngineConfig::load_or_default(cli.config.as_deref());
    config.logging.level = config.logging.level.raised_by(cli.verbose);
    init_logging(&config.logging)?;

    match cli.command {
        Commands::Readiness { input, json } => {
            let input: ReadinessInput = read_json(&input)?;
            let result = config.readiness_calculator().compute(&input)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("{}", "Readiness".cyan().bold());
                println!("  Score: {}", color_rho(result.rho, config.readiness.unsafe_threshold));
                if !result.flags.is_empty() {
                    let flags: Vec<&str> = result.flags.iter().map(|f| f.as_str()).collect();
                    println!("  Flags: {}", flags.join(", ").dimmed());
                }
                if !config.readiness_calculator().is_safe(result.rho) {
                    println!("{}", "⚠ Readiness too low for overload today".red().bold());
                }
            }
        }

        Commands::Prescribe { input, readiness, json } => {
            let request: SessionRequest = read_json(&input)?;
            let prescriber = config.session_prescriber();

            let recommendation = match readiness {
                Some(path) => {
                    let readiness_input: ReadinessInput = read_json(&path)?;
                    let result = config.readiness_calculator().compute(&readiness_input)?;
                    prescriber.prescribe_with_readiness(&result, &request)?
                }
                None => prescriber.prescribe(&request)?,
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&recommendation)?);
            } else {
                print_recommendation(&recommendation, config.readiness.unsafe_threshold);
            }
        }

        Commands::LogSession { db, user, input, unit } => {
            let unit: WeightUnit = unit.parse()?;
            let log: SessionLog = read_json(&input)?;
            let sets: Vec<ExerciseSetRecord> = log
                .sets
                .into_iter()
                .map(|s| {
                    let record =
                        ExerciseSetRecord::new(s.exercise_name, s.weight, s.reps, s.sets, s.unit, log.date).or_unit(unit);
                    match s.exercise_id {
                        Some(id) => record.with_exercise_id(id),
                        None => record,
                    }
                })
                .collect();

            let mut store = HistoryStore::new(&db)?;
            let session = store.log_session(&user, log.template_id.as_deref(), log.date, sets)?;
            info!(session_id = %session.session_id, user = %user, "Logged session");

            println!("{}", "✓ Session logged".green().bold());
            println!("  Id: {}", session.session_id);
            println!("  Date: {}", session.workout_date);
            println!("  Sets: {}", session.sets.len());

            let records = store.personal_records(&user, &session, unit)?;
            for record in records {
                let previous = record
                    .previous_best
                    .map(|v| format!(" (previous {})", round_to_places(v, 1)))
                    .unwrap_or_default();
                println!(
                    "  {} {} {:?}: {}{}",
                    "🏆 PR".yellow().bold(),
                    record.exercise_name,
                    record.metric,
                    round_to_places(record.value, 1),
                    previous
                );
            }
        }

        Commands::Context { scope, json } => {
            let context = load_context(&config, &scope)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&context)?);
            } else {
                print_context(&context);
            }
        }

        Commands::Plan { scope, format, output } => {
            let context = load_context(&config, &scope)?;
            let plan = config.plan_generator().generate_plan(&context)?;

            for warning in &plan.warnings {
                eprintln!("{} {}", "warning:".yellow().bold(), warning);
            }

            let format = match (&format, &output) {
                (Some(name), _) => ExportFormat::from_str(name)?,
                (None, Some(path)) => ExportFormat::from_path(path).unwrap_or(ExportFormat::Text),
                (None, None) => ExportFormat::Text,
            };
            match output {
                Some(path) => {
                    export::export_plan(&plan, format, &path)?;
                    println!("{} {}", "✓ Plan written to".green().bold(), path.display());
                }
                None => print!("{}", export::render_plan(&plan, format)?),
            }
        }

        Commands::Config { show, init, path } => {
            let config_path = cli.config.clone().unwrap_or_else(EngineConfig::default_config_path);

            if path {
                println!("{}", config_path.display());
            }
            if init {
                let mut fresh = EngineConfig::default();
                fresh.save_to_file(&config_path)?;
                println!("{} {}", "✓ Wrote default configuration to".green().bold(), config_path.display());
            }
            if show || !(path || init) {
                print!("{}", toml::to_string_pretty(&config)?);
            }
        }
    }

    Ok(())
}

/// Read JSON from a file, or stdin when the path is "-"
fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = if path == Path::new("-") {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read stdin")?;
        buffer
    } else {
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?
    };
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {}", path.display()))
}

fn load_context(config: &EngineConfig, scope: &ScopeArgs) -> Result<PlaybookGenerationContext> {
    let target_type: TargetType = scope.target_type.parse()?;
    let preferences: UserPreferences = match &scope.prefs {
        Some(path) => read_json(path)?,
        None => UserPreferences::default(),
    };
    let store = HistoryStore::new(&scope.db)?;
    Ok(config
        .context_aggregator()
        .aggregate(&store, &scope.user, target_type, &scope.ids, preferences))
}

fn color_rho(rho: f64, unsafe_threshold: f64) -> ColoredString {
    let text = format!("{:.2}", rho);
    if rho < unsafe_threshold {
        text.red().bold()
    } else if rho < 0.6 {
        text.yellow()
    } else {
        text.green()
    }
}

fn display_or_dash<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

fn print_recommendation(recommendation: &SessionRecommendation, unsafe_threshold: f64) {
    println!("{}", "Session prescription".cyan().bold());
    println!("  Readiness: {}", color_rho(recommendation.rho, unsafe_threshold));
    println!("  Overload multiplier: {:.3}", recommendation.overload_multiplier);
    println!(
        "  Predicted chance of beating best volume: {:.0}%",
        recommendation.session_predicted_chance * 100.0
    );

    let rows: Vec<SetRow> = recommendation
        .per_exercise
        .iter()
        .flat_map(|exercise| {
            exercise.sets.iter().map(move |set| SetRow {
                exercise: exercise.name.clone(),
                set_id: set.set_id.clone(),
                weight: display_or_dash(set.suggested_weight_kg),
                reps: display_or_dash(set.suggested_reps),
                rest: display_or_dash(set.suggested_rest_seconds),
                rationale: set.rationale.clone(),
            })
        })
        .collect();

    if rows.is_empty() {
        println!("{}", "  No sets prescribed".dimmed());
    } else {
        let mut table = Table::new(rows);
        table.with(Style::modern());
        println!("{}", table);
    }

    if recommendation.is_conservative() {
        println!("{}", "⚠ Low readiness: hold or reduce load today".red().bold());
    }
    for warning in &recommendation.warnings {
        println!("{} {}", "warning:".yellow().bold(), warning);
    }
}

fn print_context(context: &PlaybookGenerationContext) {
    println!("{}", "Training context".cyan().bold());
    println!("  User: {}", context.user_id);
    println!("  Sessions: {}", context.total_sessions);

    let rows: Vec<ExerciseRow> = context
        .exercise_names
        .values()
        .map(|name| {
            let trend = context.volume_trends.get(name);
            ExerciseRow {
                exercise: name.clone(),
                one_rm: display_or_dash(context.current_one_rm_estimates.get(name).map(|v| round_to_places(*v, 1))),
                trend: display_or_dash(trend.map(|t| format!("{:?}", t.direction).to_lowercase())),
                consistency: display_or_dash(trend.map(|t| t.consistency)),
            }
        })
        .collect();

    if !rows.is_empty() {
        let mut table = Table::new(rows);
        table.with(Style::modern());
        println!("{}", table);
    }
    for warning in &context.warnings {
        println!("{} {}", "warning:".yellow().bold(), warning);
    }
}
