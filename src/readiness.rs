//! Session readiness from recovery and wellness signals
//!
//! Converts either device-derived recovery data (recovery score, sleep
//! performance, HRV, resting heart rate, yesterday's strain) or a manual
//! wellness check-in into a normalised readiness score `rho` in `[0, 1]`.
//!
//! # Device-derived path
//!
//! ```text
//! h   = clip(hrv_now / hrv_baseline, 0.8, 1.2)     (1.0 when missing)
//! r   = clip(rhr_baseline / rhr_now, 0.8, 1.2)     (1.0 when missing)
//! s   = sleep_performance / 100                    (0.5 when missing)
//! c   = recovery_score / 100                       (0.5 when missing)
//! rho = clip(0.4c + 0.3s + 0.15h + 0.15r, 0, 1)
//! ```
//!
//! A strain above 14 yesterday costs 0.05.
//!
//! # Manual path
//!
//! ```text
//! rho = clip(0.5 × energy/10 + 0.4 × sleep/10 + 0.05h + 0.05r, 0, 1)
//! ```
//!
//! where `h` and `r` come from any device signals sent alongside the check-in.
//!
//! Below `rho = 0.35` no overload may be prescribed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tracing::debug;

use crate::error::{Result, ValidationError};

/// Readiness below which the session prescriber refuses to add load
pub const UNSAFE_READINESS_THRESHOLD: f64 = 0.35;

/// Neutral value for missing ratio signals (HRV, RHR)
const NEUTRAL_RATIO: f64 = 1.0;

/// Neutral value for missing normalised scores (recovery, sleep)
const NEUTRAL_SCORE: f64 = 0.5;

/// Clip `x` into `[lo, hi]`
pub fn clip(x: f64, lo: f64, hi: f64) -> f64 {
    x.max(lo).min(hi)
}

/// Readiness settings, configurable through the engine config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessSettings {
    /// Below this readiness no overload is prescribed
    pub unsafe_threshold: f64,
    /// Strain above which yesterday counts as a hard day (0-21 scale)
    pub high_strain_threshold: f64,
    /// Readiness deducted after a hard day
    pub strain_penalty: f64,
}

impl Default for ReadinessSettings {
    fn default() -> Self {
        ReadinessSettings {
            unsafe_threshold: UNSAFE_READINESS_THRESHOLD,
            high_strain_threshold: 14.0,
            strain_penalty: 0.05,
        }
    }
}

/// Device-derived recovery signals. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceReadinessInput {
    /// Recovery score, 0-100
    pub recovery_score: Option<f64>,
    /// Sleep performance, 0-100
    pub sleep_performance: Option<f64>,
    /// Current HRV (ms)
    pub hrv_now: Option<f64>,
    /// Baseline HRV (ms)
    pub hrv_baseline: Option<f64>,
    /// Current resting heart rate (bpm)
    pub rhr_now: Option<f64>,
    /// Baseline resting heart rate (bpm)
    pub rhr_baseline: Option<f64>,
    /// Previous day's strain, 0-21
    pub yesterday_strain: Option<f64>,
}

/// Manual wellness check-in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualReadinessInput {
    /// Self-reported energy, 1-10
    pub energy_level: u8,
    /// Self-reported sleep quality, 1-10
    pub sleep_quality: u8,
    /// Free-text notes
    #[serde(default)]
    pub notes: Option<String>,
    /// Device signals recorded alongside the check-in, if any
    #[serde(default)]
    pub device: Option<DeviceReadinessInput>,
}

/// Readiness input: exactly one variant is active per computation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ReadinessInput {
    Device(DeviceReadinessInput),
    Manual(ManualReadinessInput),
}

impl ReadinessInput {
    /// Resolve the active variant once at the boundary.
    ///
    /// A manual check-in takes precedence; device signals then only feed
    /// its HRV and RHR terms. With neither, an empty device input is used
    /// and every signal defaults.
    pub fn resolve(manual: Option<ManualReadinessInput>, device: Option<DeviceReadinessInput>) -> Self {
        match manual {
            Some(mut manual) => {
                if manual.device.is_none() {
                    manual.device = device;
                }
                ReadinessInput::Manual(manual)
            }
            None => ReadinessInput::Device(device.unwrap_or_default()),
        }
    }
}

/// Flags explaining which defaults were used and which thresholds were crossed
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessFlag {
    MissingHrv,
    MissingRhr,
    MissingSleep,
    MissingRecovery,
    LowRecovery,
    GoodRecovery,
    PoorSleep,
    GoodSleep,
    HighStrainYesterday,
    ManualWellnessInput,
    LowEnergy,
    StressNoted,
    IllnessNoted,
    UnsafeReadiness,
}

impl ReadinessFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadinessFlag::MissingHrv => "missing_hrv",
            ReadinessFlag::MissingRhr => "missing_rhr",
            ReadinessFlag::MissingSleep => "missing_sleep",
            ReadinessFlag::MissingRecovery => "missing_recovery",
            ReadinessFlag::LowRecovery => "low_recovery",
            ReadinessFlag::GoodRecovery => "good_recovery",
            ReadinessFlag::PoorSleep => "poor_sleep",
            ReadinessFlag::GoodSleep => "good_sleep",
            ReadinessFlag::HighStrainYesterday => "high_strain_yesterday",
            ReadinessFlag::ManualWellnessInput => "manual_wellness_input",
            ReadinessFlag::LowEnergy => "low_energy",
            ReadinessFlag::StressNoted => "stress_noted",
            ReadinessFlag::IllnessNoted => "illness_noted",
            ReadinessFlag::UnsafeReadiness => "unsafe_readiness",
        }
    }
}

impl fmt::Display for ReadinessFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Readiness score with its explanatory flags
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadinessResult {
    /// Normalised readiness, always within [0, 1]
    pub rho: f64,
    pub flags: BTreeSet<ReadinessFlag>,
}

impl ReadinessResult {
    pub fn has_flag(&self, flag: ReadinessFlag) -> bool {
        self.flags.contains(&flag)
    }
}

/// Fully populated device signals after the defaulting pass
#[derive(Debug, Clone, Copy)]
struct ResolvedSignals {
    hrv_ratio: f64,
    rhr_ratio: f64,
    sleep: f64,
    recovery: f64,
    recovery_present: bool,
    sleep_present: bool,
    strain: Option<f64>,
}

fn positive(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v > 0.0)
}

impl ResolvedSignals {
    fn resolve(input: &DeviceReadinessInput, flags: &mut BTreeSet<ReadinessFlag>) -> Self {
        let hrv_ratio = match (positive(input.hrv_now), positive(input.hrv_baseline)) {
            (Some(now), Some(baseline)) => clip(now / baseline, 0.8, 1.2),
            _ => {
                flags.insert(ReadinessFlag::MissingHrv);
                NEUTRAL_RATIO
            }
        };

        let rhr_ratio = match (positive(input.rhr_now), positive(input.rhr_baseline)) {
            (Some(now), Some(baseline)) => clip(baseline / now, 0.8, 1.2),
            _ => {
                flags.insert(ReadinessFlag::MissingRhr);
                NEUTRAL_RATIO
            }
        };

        let sleep = input.sleep_performance.map(|s| s / 100.0);
        let recovery = input.recovery_score.map(|c| c / 100.0);

        ResolvedSignals {
            hrv_ratio,
            rhr_ratio,
            sleep: sleep.unwrap_or(NEUTRAL_SCORE),
            recovery: recovery.unwrap_or(NEUTRAL_SCORE),
            sleep_present: sleep.is_some(),
            recovery_present: recovery.is_some(),
            strain: input.yesterday_strain,
        }
    }
}

fn validate_device(input: &DeviceReadinessInput) -> std::result::Result<(), ValidationError> {
    if let Some(v) = input.recovery_score {
        ValidationError::check_range("recovery_score", v, 0.0, 100.0)?;
    }
    if let Some(v) = input.sleep_performance {
        ValidationError::check_range("sleep_performance", v, 0.0, 100.0)?;
    }
    if let Some(v) = input.yesterday_strain {
        ValidationError::check_range("yesterday_strain", v, 0.0, 21.0)?;
    }
    for (field, value) in [
        ("hrv_now", input.hrv_now),
        ("hrv_baseline", input.hrv_baseline),
        ("rhr_now", input.rhr_now),
        ("rhr_baseline", input.rhr_baseline),
    ] {
        if let Some(v) = value {
            ValidationError::check_finite(field, v)?;
        }
    }
    Ok(())
}

fn validate_manual(input: &ManualReadinessInput) -> std::result::Result<(), ValidationError> {
    ValidationError::check_range("energy_level", input.energy_level as f64, 1.0, 10.0)?;
    ValidationError::check_range("sleep_quality", input.sleep_quality as f64, 1.0, 10.0)?;
    if let Some(device) = &input.device {
        validate_device(device)?;
    }
    Ok(())
}

/// Readiness calculation engine
pub struct ReadinessCalculator {
    settings: ReadinessSettings,
}

impl ReadinessCalculator {
    /// Create a calculator with default thresholds
    pub fn new() -> Self {
        ReadinessCalculator {
            settings: ReadinessSettings::default(),
        }
    }

    /// Create a calculator with custom thresholds
    pub fn with_config(settings: ReadinessSettings) -> Self {
        ReadinessCalculator { settings }
    }

    pub fn settings(&self) -> &ReadinessSettings {
        &self.settings
    }

    /// Compute readiness, validating the input first
    pub fn compute(&self, input: &ReadinessInput) -> Result<ReadinessResult> {
        let result = match input {
            ReadinessInput::Device(device) => {
                validate_device(device)?;
                self.compute_device(device)
            }
            ReadinessInput::Manual(manual) => {
                validate_manual(manual)?;
                self.compute_manual(manual)
            }
        };

        debug!(rho = result.rho, flags = ?result.flags, "Computed readiness");
        Ok(result)
    }

    /// True when `rho` is high enough to prescribe overload
    pub fn is_safe(&self, rho: f64) -> bool {
        rho >= self.settings.unsafe_threshold
    }

    fn compute_device(&self, input: &DeviceReadinessInput) -> ReadinessResult {
        let mut flags = BTreeSet::new();
        let signals = ResolvedSignals::resolve(input, &mut flags);

        if !signals.recovery_present {
            flags.insert(ReadinessFlag::MissingRecovery);
        }
        if !signals.sleep_present {
            flags.insert(ReadinessFlag::MissingSleep);
        }

        let mut rho = clip(
            0.4 * signals.recovery + 0.3 * signals.sleep + 0.15 * signals.hrv_ratio + 0.15 * signals.rhr_ratio,
            0.0,
            1.0,
        );

        if signals.strain.is_some_and(|s| s > self.settings.high_strain_threshold) {
            rho = (rho - self.settings.strain_penalty).max(0.0);
            flags.insert(ReadinessFlag::HighStrainYesterday);
        }

        if signals.recovery_present {
            if signals.recovery < 0.6 {
                flags.insert(ReadinessFlag::LowRecovery);
            } else if signals.recovery >= 0.8 {
                flags.insert(ReadinessFlag::GoodRecovery);
            }
        }
        if signals.sleep_present {
            if signals.sleep < 0.6 {
                flags.insert(ReadinessFlag::PoorSleep);
            } else if signals.sleep >= 0.8 {
                flags.insert(ReadinessFlag::GoodSleep);
            }
        }

        ReadinessResult { rho, flags }
    }

    fn compute_manual(&self, input: &ManualReadinessInput) -> ReadinessResult {
        let mut flags = BTreeSet::new();
        flags.insert(ReadinessFlag::ManualWellnessInput);

        let (hrv_ratio, rhr_ratio) = match &input.device {
            Some(device) => {
                let signals = ResolvedSignals::resolve(device, &mut flags);
                (signals.hrv_ratio, signals.rhr_ratio)
            }
            None => (NEUTRAL_RATIO, NEUTRAL_RATIO),
        };

        let energy = input.energy_level as f64 / 10.0;
        let sleep = input.sleep_quality as f64 / 10.0;
        let rho = clip(0.5 * energy + 0.4 * sleep + 0.05 * hrv_ratio + 0.05 * rhr_ratio, 0.0, 1.0);

        if input.energy_level <= 3 {
            flags.insert(ReadinessFlag::LowEnergy);
        }
        if input.sleep_quality <= 3 {
            flags.insert(ReadinessFlag::PoorSleep);
        }
        if let Some(notes) = &input.notes {
            let notes = notes.to_lowercase();
            if notes.contains("stress") {
                flags.insert(ReadinessFlag::StressNoted);
            }
            if notes.contains("sick") {
                flags.insert(ReadinessFlag::IllnessNoted);
            }
        }

        ReadinessResult { rho, flags }
    }
}

impl Default for ReadinessCalculator {
    fn default() -> Self {
        Self::new()
    }
}

/// Compute readiness with default settings
pub fn compute_readiness(input: &ReadinessInput) -> Result<ReadinessResult> {
    ReadinessCalculator::new().compute(input)
}
