//! # Study Output
//!
//! Plain-text tables for the terminal, a TOML report of every configuration,
//! and tab-separated exports for external plotting.

use crate::config::{Configuration, Scenario, SignalStrength, StudyConfig};
use crate::diagnostics::Diagnostic;
use crate::illustrate::Illustration;
use crate::model::ModelKind;
use crate::runner::{AggregateResult, Summary};
use csv::WriterBuilder;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// How failed fits enter the means; printed with every table and report.
pub const MISSING_CELL_POLICY: &str = "Failed fits and non-finite values are excluded cell by cell; \
     each mean divides by its own effective N. Replications are never resampled.";

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to write output file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to write TSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("Failed to serialize report to TOML: {0}")]
    Toml(#[from] toml::ser::Error),
    #[error("Failed to format table: {0}")]
    Format(#[from] std::fmt::Error),
}

// =============================================================================
// Plain-Text Table
// =============================================================================

/// Renders one configuration as the 5x4 table of means with effective-N,
/// failure and cutpoint notes underneath.
pub fn render_table(result: &AggregateResult) -> Result<String, ReportError> {
    let signal = result.configuration.signal;
    let mut out = String::new();
    writeln!(
        out,
        "Scenario: {}, signal: {} ({} replications)",
        result.configuration.scenario, signal, result.replications
    )?;

    write!(out, "{:<14}", "")?;
    for model in ModelKind::ALL {
        write!(out, "{:>12}", model.name())?;
    }
    out.push('\n');

    for diagnostic in Diagnostic::ALL {
        write!(out, "{:<14}", diagnostic.label(signal))?;
        for model in ModelKind::ALL {
            write!(out, "{:>12}", format_mean(diagnostic, result.mean(diagnostic, model)))?;
        }
        out.push('\n');
    }

    write!(out, "{:<14}", "effective N")?;
    for model in ModelKind::ALL {
        let n = Diagnostic::ALL
            .iter()
            .map(|&d| result.effective_n(d, model))
            .min()
            .unwrap_or(0);
        write!(out, "{n:>12}")?;
    }
    out.push('\n');

    for model in ModelKind::ALL {
        let failures = result.failures(model);
        if !failures.is_empty() {
            let detail: Vec<String> = failures.iter().map(|(k, c)| format!("{k} = {c}")).collect();
            writeln!(out, "  {model} failures: {}", detail.join(", "))?;
        }
    }
    for model in ModelKind::ALL {
        if let Some(cutpoint) = result.cutpoint(model) {
            writeln!(
                out,
                "  {model} cutpoint: mean {:.3}, sd {:.3} (standardized age)",
                cutpoint.mean, cutpoint.sd
            )?;
        }
    }
    writeln!(out, "  {MISSING_CELL_POLICY}")?;
    Ok(out)
}

fn format_mean(diagnostic: Diagnostic, value: f64) -> String {
    if value.is_nan() {
        return "NA".to_string();
    }
    match diagnostic {
        Diagnostic::Deviance | Diagnostic::Aic => format!("{value:.2}"),
        _ => format!("{value:.4}"),
    }
}

// =============================================================================
// TOML Report
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct StudyReport {
    pub missing_cell_policy: String,
    pub config: StudyConfig,
    pub configurations: Vec<ConfigurationReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfigurationReport {
    pub scenario: Scenario,
    pub signal: SignalStrength,
    pub detection_label: String,
    pub replications: u64,
    pub models: Vec<ModelReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelReport {
    pub model: ModelKind,
    pub failures: BTreeMap<String, u64>,
    pub cutpoint: Option<Summary>,
    pub age_coefficient: Option<Summary>,
    pub diagnostics: Vec<CellReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CellReport {
    pub diagnostic: Diagnostic,
    pub mean: f64,
    pub effective_n: u64,
}

impl StudyReport {
    pub fn new(config: &StudyConfig, results: &[AggregateResult]) -> Self {
        StudyReport {
            missing_cell_policy: MISSING_CELL_POLICY.to_string(),
            config: config.clone(),
            configurations: results.iter().map(configuration_report).collect(),
        }
    }

    pub fn to_toml_string(&self) -> Result<String, ReportError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn write(&self, path: &Path) -> Result<(), ReportError> {
        fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }
}

fn configuration_report(result: &AggregateResult) -> ConfigurationReport {
    let models = ModelKind::ALL
        .into_iter()
        .map(|model| ModelReport {
            model,
            failures: result.failures(model).clone(),
            cutpoint: result.cutpoint(model),
            age_coefficient: result.age_coefficient(model),
            diagnostics: Diagnostic::ALL
                .into_iter()
                .map(|diagnostic| CellReport {
                    diagnostic,
                    mean: result.mean(diagnostic, model),
                    effective_n: result.effective_n(diagnostic, model),
                })
                .collect(),
        })
        .collect();
    ConfigurationReport {
        scenario: result.configuration.scenario,
        signal: result.configuration.signal,
        detection_label: result.configuration.signal.detection_label().to_string(),
        replications: result.replications,
        models,
    }
}

// =============================================================================
// TSV Exports
// =============================================================================

/// Long-format aggregate: one row per configuration, diagnostic and model.
pub fn write_tsv(path: &Path, results: &[AggregateResult]) -> Result<(), ReportError> {
    let mut wtr = WriterBuilder::new().delimiter(b'\t').from_path(path)?;
    wtr.write_record(["scenario", "signal", "diagnostic", "model", "mean", "effective_n"])?;
    for result in results {
        for diagnostic in Diagnostic::ALL {
            for model in ModelKind::ALL {
                wtr.write_record([
                    result.configuration.scenario.name().to_string(),
                    result.configuration.signal.name().to_string(),
                    diagnostic.name().to_string(),
                    model.name().to_string(),
                    format!("{:.10}", result.mean(diagnostic, model)),
                    result.effective_n(diagnostic, model).to_string(),
                ])?;
            }
        }
    }
    wtr.flush()?;
    Ok(())
}

/// File name of a configuration's illustration export.
pub fn illustration_file_name(configuration: Configuration) -> String {
    format!("illustration_{}.tsv", configuration.slug())
}

/// Per-row illustration data; failed models leave their column empty.
pub fn write_illustration_tsv(path: &Path, illustration: &Illustration) -> Result<(), ReportError> {
    let mut wtr = WriterBuilder::new().delimiter(b'\t').from_path(path)?;
    let mut header = vec![
        "age".to_string(),
        "age_raw".to_string(),
        "sex".to_string(),
        "outcome".to_string(),
        "true_probability".to_string(),
    ];
    header.extend(ModelKind::ALL.iter().map(|m| format!("fitted_{}", m.name())));
    wtr.write_record(&header)?;

    for row in &illustration.rows {
        let mut record = vec![
            format!("{:.10}", row.age),
            format!("{}", row.age_raw),
            format!("{}", row.sex),
            format!("{}", row.outcome),
            format!("{:.10}", row.true_probability),
        ];
        record.extend(
            row.fitted
                .iter()
                .map(|p| p.map_or_else(String::new, |p| format!("{p:.10}"))),
        );
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::DiagnosticRecord;
    use crate::runner::{Accumulator, ReplicationCell, ReplicationResult};

    fn aggregate() -> AggregateResult {
        let record = DiagnosticRecord {
            roc_area: 0.61,
            deviance: 1300.5,
            aic: 1306.5,
            pseudo_r2: 0.012,
            effect_detected: false,
        };
        let ok = |cutpoint: Option<f64>| -> Result<ReplicationCell, &'static str> {
            Ok(ReplicationCell {
                record,
                cutpoint,
                age_coefficient: Some(0.05),
            })
        };
        let mut acc = Accumulator::new();
        acc.add(&ReplicationResult {
            cells: [ok(None), ok(Some(0.0)), Err("separation"), ok(None)],
        });
        acc.add(&ReplicationResult {
            cells: [ok(None), ok(Some(0.2)), ok(Some(-1.1)), ok(None)],
        });
        acc.finish(Configuration::new(Scenario::Continuous, SignalStrength::Weak))
    }

    #[test]
    fn table_labels_detection_row_and_notes_failures() {
        let table = render_table(&aggregate()).unwrap();
        assert!(table.contains("type I error"));
        assert!(table.contains("optimal failures: separation = 1"));
        assert!(table.contains("median cutpoint: mean 0.100"));
        assert!(table.contains(MISSING_CELL_POLICY));
    }

    #[test]
    fn toml_report_round_trips_through_a_parser() {
        let report = StudyReport::new(&StudyConfig::default(), &[aggregate()]);
        let text = report.to_toml_string().unwrap();
        let value: toml::Value = toml::from_str(&text).unwrap();
        let configurations = value["configurations"].as_array().unwrap();
        assert_eq!(configurations.len(), 1);
        assert_eq!(configurations[0]["scenario"].as_str(), Some("continuous"));
        assert_eq!(configurations[0]["models"].as_array().unwrap().len(), 4);
    }
}
