// ========================================================================================
//
//                               The orchestrator: bisg
//
// ========================================================================================
//
// Thin command-line wrapper around the library. It owns argument parsing, settings
// resolution, file and stdio plumbing, logging and progress display. Reference tables
// are built exactly once per invocation, before any input is read, and handed by
// reference to the imputer or the synthesizer.

#![deny(dead_code)]
#![deny(unused_imports)]

use bisg::config::Settings;
use bisg::impute::{FallbackPolicy, Imputer};
use bisg::progress::{ImputeProgressObserver, ImputeProgressStage};
use bisg::reference::ReferenceTables;
use bisg::synthesize::{sample_first_name, sample_last_name};
use bisg::types::{RaceEthnicity, Sex};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use flate2::read::MultiGzDecoder;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::info;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::error::Error;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, IsTerminal, Read, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::time::{Duration, Instant};

/// Path sentinel selecting standard input or standard output.
const STDIO_SENTINEL: &str = "-";

// ========================================================================================
//                              Command-line interface definition
// ========================================================================================

#[derive(Clone, Copy, ValueEnum)]
pub enum FallbackCli {
    /// 1/6 per race/ethnicity field, 0.5 per gender field
    Uniform,
    /// 1 in every field
    MissFlag,
}

impl From<FallbackCli> for FallbackPolicy {
    fn from(value: FallbackCli) -> Self {
        match value {
            FallbackCli::Uniform => FallbackPolicy::Uniform,
            FallbackCli::MissFlag => FallbackPolicy::MissFlag,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum SexCli {
    Female,
    Male,
}

impl From<SexCli> for Sex {
    fn from(value: SexCli) -> Self {
        match value {
            SexCli::Female => Sex::Female,
            SexCli::Male => Sex::Male,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum CategoryCli {
    White,
    Black,
    Api,
    Aian,
    Multiracial,
    Hispanic,
}

impl From<CategoryCli> for RaceEthnicity {
    fn from(value: CategoryCli) -> Self {
        match value {
            CategoryCli::White => RaceEthnicity::White,
            CategoryCli::Black => RaceEthnicity::Black,
            CategoryCli::Api => RaceEthnicity::AsianPacificIslander,
            CategoryCli::Aian => RaceEthnicity::AmericanIndianAlaskaNative,
            CategoryCli::Multiracial => RaceEthnicity::Multiracial,
            CategoryCli::Hispanic => RaceEthnicity::Hispanic,
        }
    }
}

/// Where the reference data lives. Flags override the settings file.
#[derive(Args)]
pub struct ReferenceArgs {
    /// Path to a TOML settings file
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Census surname file (CSV with name and pct* columns)
    #[arg(long, value_name = "PATH")]
    pub surnames: Option<PathBuf>,

    /// Directory of per-year first-name files (yobYYYY.txt)
    #[arg(long, value_name = "DIR")]
    pub first_names: Option<PathBuf>,
}

#[derive(Args)]
pub struct ImputeArgs {
    /// Input CSV ("-" for standard input; ".gz" files are decompressed)
    #[arg(value_name = "INPUT", default_value = STDIO_SENTINEL)]
    pub input: PathBuf,

    /// Output CSV ("-" for standard output)
    #[arg(short, long, value_name = "OUTPUT", default_value = STDIO_SENTINEL)]
    pub output: PathBuf,

    /// Where to write records missing a first or last name
    #[arg(long, value_name = "PATH")]
    pub bad_output: Option<PathBuf>,

    /// Input column holding the first name
    #[arg(long)]
    pub first_name_column: Option<String>,

    /// Input column holding the last name
    #[arg(long)]
    pub last_name_column: Option<String>,

    /// Input column holding the date of birth
    #[arg(long)]
    pub dob_column: Option<String>,

    /// Records per processing batch
    #[arg(long, value_name = "N")]
    pub batch_size: Option<usize>,

    /// Values written for names with no reference match
    #[arg(long, value_enum)]
    pub fallback: Option<FallbackCli>,

    #[command(flatten)]
    pub reference: ReferenceArgs,
}

#[derive(Args)]
pub struct SampleFirstArgs {
    #[arg(long, value_enum)]
    pub sex: SexCli,

    /// Birth year whose name file to sample from
    #[arg(long)]
    pub year: i32,

    /// Number of names to draw
    #[arg(long, default_value = "1")]
    pub count: usize,

    /// Seed for reproducible draws
    #[arg(long)]
    pub seed: Option<u64>,

    #[command(flatten)]
    pub reference: ReferenceArgs,
}

#[derive(Args)]
pub struct SampleLastArgs {
    #[arg(long, value_enum)]
    pub category: CategoryCli,

    /// Number of names to draw
    #[arg(long, default_value = "1")]
    pub count: usize,

    /// Seed for reproducible draws
    #[arg(long)]
    pub seed: Option<u64>,

    #[command(flatten)]
    pub reference: ReferenceArgs,
}

#[derive(Parser)]
#[command(
    name = "bisg",
    about = "Name-based demographic imputation (BISG) and name synthesis",
    long_about = "Attaches race/ethnicity probabilities (from surnames) and gender \
                 probabilities (from first name and birth year) to every record of a CSV \
                 file, or draws synthetic names from the same reference tables."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Attach probability vectors to every record of a CSV file
    #[command(about = "Impute demographic probabilities from names")]
    Impute(ImputeArgs),

    /// Draw first names for a sex and birth year
    #[command(about = "Sample first names weighted by frequency")]
    SampleFirst(SampleFirstArgs),

    /// Draw surnames for a race/ethnicity category
    #[command(about = "Sample last names weighted by frequency")]
    SampleLast(SampleLastArgs),

    /// Display version and build information
    #[command(about = "Display version and build information")]
    Version,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let Cli { command } = cli;

    let result = match command {
        Some(Commands::Impute(args)) => run_impute(args),
        Some(Commands::SampleFirst(args)) => run_sample_first(args),
        Some(Commands::SampleLast(args)) => run_sample_last(args),
        Some(Commands::Version) => {
            print_version_info();
            Ok(())
        }
        None => {
            Cli::command().print_help().expect("print help");
            println!();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

// ========================================================================================
//                                      Subcommands
// ========================================================================================

fn resolve_settings(args: &ReferenceArgs) -> Result<Settings, Box<dyn Error>> {
    let mut settings = Settings::load_or_default(args.config.as_deref())?;
    if let Some(path) = &args.surnames {
        settings.reference.surnames = path.clone();
    }
    if let Some(dir) = &args.first_names {
        settings.reference.first_names = dir.clone();
    }
    Ok(settings)
}

fn load_tables(settings: &Settings) -> Result<ReferenceTables, Box<dyn Error>> {
    let start = Instant::now();
    let tables = ReferenceTables::build(&settings.reference_sources())?;
    info!("Reference tables built in {:.2?}", start.elapsed());
    Ok(tables)
}

fn run_impute(args: ImputeArgs) -> Result<(), Box<dyn Error>> {
    let mut settings = resolve_settings(&args.reference)?;
    if let Some(column) = args.first_name_column {
        settings.impute.first_name_column = column;
    }
    if let Some(column) = args.last_name_column {
        settings.impute.last_name_column = column;
    }
    if let Some(column) = args.dob_column {
        settings.impute.dob_column = column;
    }
    if let Some(size) = args.batch_size {
        settings.impute.batch_size = size;
    }
    if let Some(fallback) = args.fallback {
        settings.impute.fallback = fallback.into();
    }
    settings.validate()?;

    // Reference data first: a failure here must happen before any input is consumed.
    let tables = load_tables(&settings)?;
    let imputer = Imputer::new(&tables, settings.impute_options());
    info!(
        "Imputing with batch size {} and '{}' fallback.",
        imputer.options().batch_size,
        imputer.options().fallback
    );

    let reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(open_input(&args.input)?);
    let mut writer = csv::WriterBuilder::new().from_writer(create_output(&args.output)?);
    let mut bad_writer = match &args.bad_output {
        Some(path) => Some(
            csv::WriterBuilder::new()
                .flexible(true)
                .from_writer(create_output(path)?),
        ),
        None => None,
    };

    let mut progress = SpinnerProgress::new();
    imputer.run(reader, &mut writer, bad_writer.as_mut(), &mut progress)?;
    Ok(())
}

fn run_sample_first(args: SampleFirstArgs) -> Result<(), Box<dyn Error>> {
    let settings = resolve_settings(&args.reference)?;
    let tables = load_tables(&settings)?;
    let mut rng = seeded_rng(args.seed);
    let names = sample_first_name(&tables, args.sex.into(), args.year, args.count, &mut rng)?;
    print_names(&names)
}

fn run_sample_last(args: SampleLastArgs) -> Result<(), Box<dyn Error>> {
    let settings = resolve_settings(&args.reference)?;
    let tables = load_tables(&settings)?;
    let mut rng = seeded_rng(args.seed);
    let names = sample_last_name(&tables, args.category.into(), args.count, &mut rng)?;
    print_names(&names)
}

fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

fn print_names(names: &[String]) -> Result<(), Box<dyn Error>> {
    let mut out = BufWriter::new(io::stdout().lock());
    for name in names {
        writeln!(out, "{name}")?;
    }
    out.flush()?;
    Ok(())
}

// ========================================================================================
//                                     I/O plumbing
// ========================================================================================

fn open_input(path: &Path) -> io::Result<Box<dyn Read>> {
    if path == Path::new(STDIO_SENTINEL) {
        return Ok(Box::new(io::stdin().lock()));
    }
    let file = File::open(path)?;
    if path.extension().is_some_and(|ext| ext == "gz") {
        Ok(Box::new(MultiGzDecoder::new(BufReader::new(file))))
    } else {
        Ok(Box::new(file))
    }
}

fn create_output(path: &Path) -> io::Result<Box<dyn Write>> {
    if path == Path::new(STDIO_SENTINEL) {
        return Ok(Box::new(io::stdout().lock()));
    }
    Ok(Box::new(BufWriter::new(File::create(path)?)))
}

/// Spinner on stderr, drawn only when stderr is a terminal.
struct SpinnerProgress {
    pb: ProgressBar,
}

impl SpinnerProgress {
    fn new() -> Self {
        let draw_target = if io::stderr().is_terminal() {
            ProgressDrawTarget::stderr_with_hz(20)
        } else {
            ProgressDrawTarget::hidden()
        };
        let pb = ProgressBar::with_draw_target(None, draw_target);
        pb.set_style(
            ProgressStyle::with_template("> [{elapsed_precise}] {spinner} {pos} records {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        Self { pb }
    }
}

impl ImputeProgressObserver for SpinnerProgress {
    fn on_stage_start(&mut self, stage: ImputeProgressStage) {
        self.pb.set_message(stage.to_string());
        self.pb.enable_steady_tick(Duration::from_millis(100));
    }

    fn on_stage_advance(&mut self, _stage: ImputeProgressStage, processed_records: u64) {
        self.pb.set_position(processed_records);
    }

    fn on_stage_finish(&mut self, _stage: ImputeProgressStage) {
        self.pb.finish_and_clear();
    }
}

// ========================================================================================
//                                   Version reporting
// ========================================================================================

/// Format seconds into a human-readable duration like "2.4 hours ago"
fn format_duration_ago(seconds: u64) -> String {
    const MINUTE: u64 = 60;
    const HOUR: u64 = 60 * MINUTE;
    const DAY: u64 = 24 * HOUR;
    const YEAR: u64 = 365 * DAY;

    if seconds < MINUTE {
        format!("{} seconds ago", seconds)
    } else if seconds < HOUR {
        format!("{:.1} minutes ago", seconds as f64 / MINUTE as f64)
    } else if seconds < DAY {
        format!("{:.1} hours ago", seconds as f64 / HOUR as f64)
    } else if seconds < YEAR {
        format!("{:.1} days ago", seconds as f64 / DAY as f64)
    } else {
        format!("{:.1} years ago", seconds as f64 / YEAR as f64)
    }
}

fn print_version_info() {
    let version = env!("CARGO_PKG_VERSION");
    let build_timestamp: u64 = env!("BISG_BUILD_TIMESTAMP").parse().unwrap_or(0);

    println!("bisg {}", version);

    if build_timestamp > 0 {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        if now > build_timestamp {
            println!("Built: {}", format_duration_ago(now - build_timestamp));
        } else {
            println!("Built: just now");
        }
    }
}
