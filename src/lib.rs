// Library interface for liftrx
// The CLI and the integration tests both go through these modules

pub mod config;
pub mod context;
pub mod database;
pub mod error;
pub mod export;
pub mod formulas;
pub mod logging;
pub mod models;
pub mod overlay;
pub mod prescription;
pub mod readiness;
pub mod training_plan;

// Re-export commonly used types for convenience
pub use models::*;
pub use config::EngineConfig;
pub use context::{aggregate_context, ContextAggregator, HistoryProvider, InMemoryHistory, PlaybookGenerationContext};
pub use database::HistoryStore;
pub use error::{LiftRxError, Result};
pub use logging::{LogConfig, LogFormat, LogLevel};
pub use overlay::{apply_plan_overlay, apply_session_overlay, PrescriptionOverlay};
pub use prescription::{generate_session_prescription, SessionPrescriber, SessionRecommendation, SessionRequest};
pub use readiness::{compute_readiness, ReadinessCalculator, ReadinessInput, ReadinessResult};
pub use training_plan::{generate_algorithmic_plan, PlanGenerator, TrainingPlan};
