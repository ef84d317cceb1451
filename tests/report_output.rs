use std::fs;
use std::process::Command;

use csv::ReaderBuilder;
use cutpoint_study::config::{Configuration, Scenario, SignalStrength, StudyConfig};
use cutpoint_study::illustrate::illustrate;
use cutpoint_study::report::{
    StudyReport, illustration_file_name, render_table, write_illustration_tsv, write_tsv,
};
use cutpoint_study::runner::run_study;
use tempfile::tempdir;

fn quick_config() -> StudyConfig {
    StudyConfig {
        replications: 12,
        sample_size: 400,
        illustration_sample_size: 600,
        ..StudyConfig::default()
    }
}

#[test]
fn report_files_describe_every_cell() {
    let tmp = tempdir().expect("temporary directory");
    let config = quick_config();
    let configurations = [
        Configuration::new(Scenario::MedianCutpoint, SignalStrength::Strong),
        Configuration::new(Scenario::MedianCutpoint, SignalStrength::Weak),
    ];
    let results = run_study(&config, &configurations, false).expect("study runs");
    assert_eq!(results.len(), 2);

    let table = render_table(&results[0]).expect("render table");
    assert!(table.contains("power"));
    assert!(render_table(&results[1]).expect("render table").contains("type I error"));

    let tsv_path = tmp.path().join("summary.tsv");
    write_tsv(&tsv_path, &results).expect("write tsv");
    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .from_path(&tsv_path)
        .expect("open tsv");
    let headers = reader.headers().expect("headers").clone();
    assert_eq!(&headers[0], "scenario");
    assert_eq!(&headers[5], "effective_n");
    let rows: Vec<_> = reader.records().map(|r| r.expect("row")).collect();
    assert_eq!(rows.len(), 2 * 5 * 4);
    assert!(rows.iter().all(|r| &r[0] == "median"));

    let report_path = tmp.path().join("report.toml");
    StudyReport::new(&config, &results)
        .write(&report_path)
        .expect("write report");
    let text = fs::read_to_string(&report_path).expect("read report");
    let value: toml::Value = toml::from_str(&text).expect("valid toml");
    assert_eq!(value["config"]["replications"].as_integer(), Some(12));
    let reported = value["configurations"].as_array().expect("configurations");
    assert_eq!(reported.len(), 2);
    assert_eq!(reported[1]["detection_label"].as_str(), Some("type I error"));
}

#[test]
fn illustration_tsv_has_a_column_per_model() {
    let tmp = tempdir().expect("temporary directory");
    let config = quick_config();
    let configuration = Configuration::new(Scenario::OffMedianCutpoint, SignalStrength::Weak);
    let illustration = illustrate(configuration, &config).expect("illustration");

    let path = tmp.path().join(illustration_file_name(configuration));
    assert!(path.ends_with("illustration_off-median_weak.tsv"));
    write_illustration_tsv(&path, &illustration).expect("write illustration");

    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .from_path(&path)
        .expect("open illustration");
    let headers = reader.headers().expect("headers").clone();
    assert_eq!(headers.len(), 9);
    assert_eq!(&headers[8], "fitted_spline");
    assert_eq!(reader.records().count(), 600);
}

#[test]
fn cli_prints_default_config_and_runs_a_short_study() {
    let exe = env!("CARGO_BIN_EXE_cutpoint-study");

    let output = Command::new(exe)
        .arg("config")
        .output()
        .expect("run cutpoint-study config");
    assert!(output.status.success());
    let printed: StudyConfig =
        toml::from_str(&String::from_utf8_lossy(&output.stdout)).expect("config parses");
    assert_eq!(printed, StudyConfig::default());

    let tmp = tempdir().expect("temporary directory");
    let status = Command::new(exe)
        .args([
            "run",
            "--replications",
            "4",
            "--scenario",
            "continuous",
            "--signal",
            "weak",
            "--quiet",
            "--output-dir",
        ])
        .arg(tmp.path())
        .status()
        .expect("run cutpoint-study run");
    assert!(status.success(), "CLI exited with status {status:?}");
    assert!(tmp.path().join("study_report.toml").exists());
    assert!(tmp.path().join("study_summary.tsv").exists());

    let status = Command::new(exe)
        .args(["run", "--scenario", "nonsense", "--quiet"])
        .status()
        .expect("run cutpoint-study with a bad scenario");
    assert!(!status.success());
}
