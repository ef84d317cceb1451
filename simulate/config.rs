//! # Study Configuration
//!
//! Every constant of the study lives here: sample sizes, replication count,
//! true coefficients, the off-median cutpoint offset and the random seed. The
//! defaults reproduce the published design; a TOML file may override any subset
//! of them because every struct is `#[serde(default)]`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Errors raised while loading or validating a study configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write configuration file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize configuration to TOML: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },
    #[error("Unknown scenario '{0}'. Expected one of: continuous, median, off-median.")]
    UnknownScenario(String),
    #[error("Unknown signal strength '{0}'. Expected 'strong' or 'weak'.")]
    UnknownSignal(String),
}

/// The true data-generating process for the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scenario {
    /// Log-odds linear in standardized age.
    Continuous,
    /// Log-odds step at the sample median of age.
    #[serde(rename = "median")]
    MedianCutpoint,
    /// Log-odds step `cutpoint_offset` standardized units below the sample median.
    #[serde(rename = "off-median")]
    OffMedianCutpoint,
}

impl Scenario {
    pub const ALL: [Scenario; 3] = [
        Scenario::Continuous,
        Scenario::MedianCutpoint,
        Scenario::OffMedianCutpoint,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Scenario::Continuous => "continuous",
            Scenario::MedianCutpoint => "median",
            Scenario::OffMedianCutpoint => "off-median",
        }
    }

    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        Scenario::ALL
            .into_iter()
            .find(|s| s.name().eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| ConfigError::UnknownScenario(name.to_string()))
    }

    /// Evaluates the scenario's linear predictor for one row.
    ///
    /// `median` is the sample median of the standardized age column; the
    /// cutpoint scenarios compare against it (or against `median - offset`).
    pub fn linear_predictor(
        self,
        age: f64,
        sex: f64,
        median: f64,
        age_coefficient: f64,
        sex_coefficient: f64,
        cutpoint_offset: f64,
    ) -> f64 {
        let age_term = match self {
            Scenario::Continuous => age,
            Scenario::MedianCutpoint => indicator(age < median),
            Scenario::OffMedianCutpoint => indicator(age < median - cutpoint_offset),
        };
        age_coefficient * age_term + sex_coefficient * sex
    }
}

fn indicator(condition: bool) -> f64 {
    if condition { 1.0 } else { 0.0 }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether age carries a true effect on the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalStrength {
    Strong,
    Weak,
}

impl SignalStrength {
    pub const ALL: [SignalStrength; 2] = [SignalStrength::Strong, SignalStrength::Weak];

    pub fn name(self) -> &'static str {
        match self {
            SignalStrength::Strong => "strong",
            SignalStrength::Weak => "weak",
        }
    }

    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        SignalStrength::ALL
            .into_iter()
            .find(|s| s.name().eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| ConfigError::UnknownSignal(name.to_string()))
    }

    /// The true age coefficient. The weak signal has no age effect at all.
    pub fn age_coefficient(self, config: &StudyConfig) -> f64 {
        match self {
            SignalStrength::Strong => config.strong_age_coefficient,
            SignalStrength::Weak => 0.0,
        }
    }

    /// What the detection rate measures under this signal.
    pub fn detection_label(self) -> &'static str {
        match self {
            SignalStrength::Strong => "power",
            SignalStrength::Weak => "type I error",
        }
    }
}

impl fmt::Display for SignalStrength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One cell of the study design: a scenario paired with a signal strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Configuration {
    pub scenario: Scenario,
    pub signal: SignalStrength,
}

impl Configuration {
    pub fn new(scenario: Scenario, signal: SignalStrength) -> Self {
        Self { scenario, signal }
    }

    /// All six configurations, scenario-major.
    pub fn all() -> Vec<Configuration> {
        Scenario::ALL
            .into_iter()
            .flat_map(|scenario| {
                SignalStrength::ALL
                    .into_iter()
                    .map(move |signal| Configuration::new(scenario, signal))
            })
            .collect()
    }

    /// A filesystem-friendly identifier, e.g. `off-median_weak`.
    pub fn slug(&self) -> String {
        format!("{}_{}", self.scenario.name(), self.signal.name())
    }
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} scenario, {} signal", self.scenario, self.signal)
    }
}

/// Controls for the IRLS logistic regression solver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SolverConfig {
    pub max_iterations: usize,
    /// Relative deviance change `|dev - dev_old| / (|dev| + 0.1)` below which the fit has converged.
    pub convergence_tolerance: f64,
    /// A fit whose linear predictor exceeds this magnitude has fitted
    /// probabilities that are numerically 0 or 1 and is treated as separated.
    pub separation_threshold: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            convergence_tolerance: 1e-8,
            separation_threshold: 15.0,
        }
    }
}

/// Controls for the optimal-cutpoint search.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CutpointConfig {
    /// Apply Yates' continuity correction to the 2x2 chi-squared statistic.
    pub continuity_correction: bool,
    /// Candidates leaving fewer rows than this on either side are skipped.
    pub min_group_size: usize,
}

impl Default for CutpointConfig {
    fn default() -> Self {
        Self {
            continuity_correction: false,
            min_group_size: 1,
        }
    }
}

/// The complete set of study constants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StudyConfig {
    pub seed: u64,
    pub replications: usize,
    pub sample_size: usize,
    pub illustration_sample_size: usize,
    pub age_mean: f64,
    pub age_sd: f64,
    pub sex_probability: f64,
    pub sex_coefficient: f64,
    pub strong_age_coefficient: f64,
    pub cutpoint_offset: f64,
    pub significance_level: f64,
    pub spline_df: usize,
    /// Worker threads for replications; `None` uses rayon's global pool.
    pub threads: Option<usize>,
    pub solver: SolverConfig,
    pub cutpoint: CutpointConfig,
}

impl Default for StudyConfig {
    fn default() -> Self {
        Self {
            seed: 888,
            replications: 1000,
            sample_size: 1000,
            illustration_sample_size: 10_000,
            age_mean: 45.0,
            age_sd: 7.0,
            sex_probability: 0.7,
            sex_coefficient: 0.1,
            strong_age_coefficient: 0.5,
            cutpoint_offset: 1.5,
            significance_level: 0.05,
            spline_df: 2,
            threads: None,
            solver: SolverConfig::default(),
            cutpoint: CutpointConfig::default(),
        }
    }
}

impl StudyConfig {
    /// Reads a (possibly partial) TOML configuration and validates it.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let config: StudyConfig = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
            ConfigError::InvalidValue {
                field,
                reason: reason.into(),
            }
        }

        if self.replications == 0 {
            return Err(invalid("replications", "must be at least 1"));
        }
        if self.sample_size < 4 {
            return Err(invalid("sample_size", "must be at least 4"));
        }
        if self.illustration_sample_size < 4 {
            return Err(invalid("illustration_sample_size", "must be at least 4"));
        }
        if !(self.age_sd.is_finite() && self.age_sd > 0.0) {
            return Err(invalid("age_sd", format!("must be positive, got {}", self.age_sd)));
        }
        if !self.age_mean.is_finite() {
            return Err(invalid("age_mean", "must be finite"));
        }
        if !(self.sex_probability > 0.0 && self.sex_probability < 1.0) {
            return Err(invalid(
                "sex_probability",
                format!("must lie in (0, 1), got {}", self.sex_probability),
            ));
        }
        if !(self.significance_level > 0.0 && self.significance_level < 1.0) {
            return Err(invalid(
                "significance_level",
                format!("must lie in (0, 1), got {}", self.significance_level),
            ));
        }
        if self.spline_df == 0 {
            return Err(invalid("spline_df", "must be at least 1"));
        }
        if self.threads == Some(0) {
            return Err(invalid("threads", "must be at least 1 when set"));
        }
        if self.solver.max_iterations == 0 {
            return Err(invalid("solver.max_iterations", "must be at least 1"));
        }
        if !(self.solver.convergence_tolerance > 0.0) {
            return Err(invalid("solver.convergence_tolerance", "must be positive"));
        }
        if self.cutpoint.min_group_size == 0 {
            return Err(invalid("cutpoint.min_group_size", "must be at least 1"));
        }
        Ok(())
    }
}
