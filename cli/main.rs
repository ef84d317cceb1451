#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use cutpoint_study::config::{Configuration, Scenario, SignalStrength, StudyConfig};
use cutpoint_study::illustrate::illustrate;
use cutpoint_study::report::{
    StudyReport, illustration_file_name, render_table, write_illustration_tsv, write_tsv,
};
use cutpoint_study::runner::run_study;

const REPORT_FILE: &str = "study_report.toml";
const SUMMARY_FILE: &str = "study_summary.tsv";

#[derive(Args)]
pub struct RunArgs {
    /// TOML file overriding any subset of the study constants
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Number of replications per configuration
    #[arg(long, value_name = "N")]
    pub replications: Option<usize>,

    /// Base random seed; replication r uses seed + r
    #[arg(long)]
    pub seed: Option<u64>,

    /// Worker threads (defaults to all cores)
    #[arg(long, value_name = "T")]
    pub threads: Option<usize>,

    /// Directory for the TOML report and TSV summary
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub output_dir: PathBuf,

    /// Restrict to one scenario: continuous, median or off-median
    #[arg(long, value_name = "NAME")]
    pub scenario: Option<String>,

    /// Restrict to one signal strength: strong or weak
    #[arg(long, value_name = "NAME")]
    pub signal: Option<String>,

    /// Hide progress bars
    #[arg(long)]
    pub quiet: bool,
}

#[derive(Args)]
pub struct IllustrateArgs {
    /// TOML file overriding any subset of the study constants
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory for the illustration TSV files
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub output_dir: PathBuf,

    /// Rows in each illustration dataset
    #[arg(long, value_name = "N")]
    pub sample_size: Option<usize>,
}

#[derive(Parser)]
#[command(
    name = "cutpoint-study",
    about = "Monte Carlo study of dichotomizing a continuous predictor in logistic regression",
    long_about = "Simulates datasets under continuous, median-step and off-median-step age effects, \
                 fits continuous, median-split, optimal-split and natural-spline logistic models, \
                 and reports mean ROC area, deviance, AIC, pseudo R2 and detection rate."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the replication study and write the report
    Run(RunArgs),
    /// Fit all models to one large dataset per configuration and export the curves
    Illustrate(IllustrateArgs),
    /// Print the default configuration as TOML
    Config,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Cli { command } = Cli::parse();

    let result = match command {
        Some(Commands::Run(args)) => run(args),
        Some(Commands::Illustrate(args)) => run_illustrate(args),
        Some(Commands::Config) => print_default_config(),
        None => Cli::command()
            .print_help()
            .map(|()| println!())
            .map_err(Box::<dyn Error>::from),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> Result<StudyConfig, Box<dyn Error>> {
    match path {
        Some(path) => {
            log::info!("Loading configuration from {}", path.display());
            Ok(StudyConfig::load(path)?)
        }
        None => Ok(StudyConfig::default()),
    }
}

fn selected_configurations(
    scenario: Option<&str>,
    signal: Option<&str>,
) -> Result<Vec<Configuration>, Box<dyn Error>> {
    let scenario = scenario.map(Scenario::parse).transpose()?;
    let signal = signal.map(SignalStrength::parse).transpose()?;
    Ok(Configuration::all()
        .into_iter()
        .filter(|c| scenario.is_none_or(|s| c.scenario == s))
        .filter(|c| signal.is_none_or(|s| c.signal == s))
        .collect())
}

fn run(args: RunArgs) -> Result<(), Box<dyn Error>> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(replications) = args.replications {
        config.replications = replications;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if args.threads.is_some() {
        config.threads = args.threads;
    }
    config.validate()?;

    let configurations = selected_configurations(args.scenario.as_deref(), args.signal.as_deref())?;
    fs::create_dir_all(&args.output_dir)?;

    log::info!(
        "Running {} configuration(s), {} replications each, seed {}",
        configurations.len(),
        config.replications,
        config.seed
    );
    let results = run_study(&config, &configurations, !args.quiet)?;

    for result in &results {
        println!("{}", render_table(result)?);
    }

    let report_path = args.output_dir.join(REPORT_FILE);
    StudyReport::new(&config, &results).write(&report_path)?;
    let summary_path = args.output_dir.join(SUMMARY_FILE);
    write_tsv(&summary_path, &results)?;
    log::info!(
        "Wrote {} and {}",
        report_path.display(),
        summary_path.display()
    );
    Ok(())
}

fn run_illustrate(args: IllustrateArgs) -> Result<(), Box<dyn Error>> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(n) = args.sample_size {
        config.illustration_sample_size = n;
    }
    config.validate()?;
    fs::create_dir_all(&args.output_dir)?;

    for configuration in Configuration::all() {
        let illustration = illustrate(configuration, &config)?;
        let path = args.output_dir.join(illustration_file_name(configuration));
        write_illustration_tsv(&path, &illustration)?;
        println!("wrote {}", path.display());
    }
    Ok(())
}

fn print_default_config() -> Result<(), Box<dyn Error>> {
    print!("{}", StudyConfig::default().to_toml_string()?);
    Ok(())
}
