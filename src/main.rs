use std::path::{Path, PathBuf};
use std::process::ExitCode;

use chrono::Local;
use clap::{Parser, Subcommand};
use doctor_directory_scraper::cleaning::{quality_report, Tidy};
use doctor_directory_scraper::dedup::dedupe_table;
use doctor_directory_scraper::geo::RegionTable;
use doctor_directory_scraper::location::{
    analyze_locations, blank_garbage_locations, GarbageRules, LocationCleaner,
    NominatimResolver, OfflineResolver,
};
use doctor_directory_scraper::{write_to_csv, Config, DoctorStore, Result, Scraper, Table};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "docscrape", about = "Scrape and clean doctor directory listings")]
struct Cli {
    /// TOML config file (default: docscrape.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scrape every configured city and specialty
    Scrape {
        #[arg(long)]
        max_pages: Option<u32>,
        #[arg(long)]
        max_doctors: Option<usize>,
        /// Write the CSV here instead of the configured path
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Blank garbage locations in place
    BlankGarbage {
        input: PathBuf,
        output: Option<PathBuf>,
    },
    /// Recover garbage locations from map links and city names
    CleanLocations {
        input: PathBuf,
        output: Option<PathBuf>,
        /// Reverse-geocode coordinates over the network
        #[arg(long)]
        online: bool,
    },
    /// Collapse duplicate doctors, keeping the most complete row
    Dedupe {
        input: PathBuf,
        output: Option<PathBuf>,
    },
    /// Dedupe, fill gaps, standardise and report
    Tidy {
        input: PathBuf,
        output: Option<PathBuf>,
        #[arg(long)]
        city: Option<String>,
    },
    /// Print location statistics and a quality report
    Analyze { input: PathBuf },
}

fn cleaned_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_owned());
    input.with_file_name(format!("{}_cleaned.csv", stem))
}

fn tidy_path(input: &Path) -> PathBuf {
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    input.with_file_name(format!("doctors_cleaned_{}.csv", stamp))
}

fn write_table(table: &Table, path: &Path) -> Result<()> {
    table.write(path)?;
    info!(path = %path.display(), records = table.len(), "saved cleaned data");
    Ok(())
}

async fn scrape(
    mut config: Config,
    max_pages: Option<u32>,
    max_doctors: Option<usize>,
    output: Option<PathBuf>,
) -> Result<()> {
    if let Some(pages) = max_pages {
        config.max_pages = pages;
    }
    if max_doctors.is_some() {
        config.max_doctors_per_specialty = max_doctors;
    }
    let csv_path = output.unwrap_or_else(|| config.csv_path());
    let database = config.database.clone();

    let records = {
        let scraper = Scraper::new(config)?;
        scraper.scrape_all().await
    };

    if records.is_empty() {
        warn!("no data scraped");
    }
    write_to_csv(&records, &csv_path)?;

    if let Some(path) = database {
        match DoctorStore::open(&path) {
            Ok(store) => {
                store.upsert_all(&records);
            }
            Err(err) => warn!(path = %path.display(), error = %err, "database unavailable"),
        }
    }
    Ok(())
}

async fn clean_locations(config: &Config, input: &Path, output: &Path, online: bool) -> Result<()> {
    let mut table = Table::read(input)?;
    info!(records = table.len(), "loaded {}", input.display());

    let summary = if online {
        let cleaner = LocationCleaner::new(NominatimResolver::new(&config.geo)?);
        cleaner.clean_table(&mut table).await?
    } else {
        let regions = RegionTable::from_config(&config.geo)?;
        let cleaner = LocationCleaner::new(OfflineResolver::new(regions));
        cleaner.clean_table(&mut table).await?
    };
    summary.log();
    write_table(&table, output)
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Scrape {
            max_pages,
            max_doctors,
            output,
        } => scrape(config, max_pages, max_doctors, output).await,
        Command::BlankGarbage { input, output } => {
            let mut table = Table::read(&input)?;
            let changed = blank_garbage_locations(&mut table, GarbageRules::simple())?;
            info!("cleaned {} garbage locations", changed);
            write_table(&table, &output.unwrap_or_else(|| cleaned_path(&input)))
        }
        Command::CleanLocations {
            input,
            output,
            online,
        } => {
            let output = output.unwrap_or_else(|| cleaned_path(&input));
            clean_locations(&config, &input, &output, online).await
        }
        Command::Dedupe { input, output } => {
            let mut table = Table::read(&input)?;
            dedupe_table(&mut table)?;
            write_table(&table, &output.unwrap_or_else(|| cleaned_path(&input)))
        }
        Command::Tidy {
            input,
            output,
            city,
        } => {
            let mut table = Table::read(&input)?;
            Tidy::new(&config).with_city_filter(city).run(&mut table)?;
            write_table(&table, &output.unwrap_or_else(|| tidy_path(&input)))
        }
        Command::Analyze { input } => {
            let table = Table::read(&input)?;
            analyze_locations(&table, GarbageRules::default())?.log();
            quality_report(&table).log();
            Ok(())
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}
