mod address;
mod counties;
mod db;
mod directory;
mod extract;
mod fetch;
mod geocode;
mod import;
mod models;
mod normalize;
mod progress;
mod scrape;
mod verify;
mod workflow;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use env_logger::Builder;
use log::{error, LevelFilter};

use counties::{County, COUNTIES};
use db::{Database, UpsertAction};
use directory::check_directory;
use extract::{company_from_extracted, create_extractor};
use fetch::Fetcher;
use geocode::{geocode_file, Geocoder};
use import::{import_file, ImportOptions, ImportStats};
use models::Company;
use progress::{JsonProgressStore, ProgressStore};
use scrape::MapsScraper;
use verify::{DspList, Verifier};
use workflow::{RunOptions, RunStats};

#[derive(Parser)]
#[command(name = "funerar")]
#[command(about = "Romanian funeral-services directory pipeline - scrape, import, verify, geocode")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape Google Maps county by county into raw JSON files
    Scrape {
        /// Single county, by name or plate code
        #[arg(long)]
        county: Option<String>,

        /// Comma-separated county list
        #[arg(long)]
        counties: Option<String>,

        /// All 42 counties
        #[arg(long)]
        all: bool,

        /// Continue from the last checkpoint
        #[arg(long)]
        resume: bool,

        /// Show the browser window while scraping
        #[arg(long)]
        no_headless: bool,

        /// Directory for the per-county JSON files
        #[arg(long, default_value = "data")]
        out: PathBuf,
    },

    /// Import raw county JSON files into the datastore
    Import {
        /// Files to import
        files: Vec<PathBuf>,

        /// Database file path
        #[arg(long)]
        db: Option<PathBuf>,

        /// Show decisions without writing
        #[arg(long)]
        dry_run: bool,

        /// Fetch company websites to fill in missing emails and fiscal codes
        #[arg(long)]
        enrich: bool,
    },

    /// Scrape and import county by county in one pass
    Run {
        /// Comma-separated county list
        #[arg(long)]
        counties: Option<String>,

        /// All 42 counties
        #[arg(long)]
        all: bool,

        /// Continue from the last checkpoint
        #[arg(long)]
        resume: bool,

        /// Seconds to wait between counties
        #[arg(long, default_value_t = workflow::DEFAULT_DELAY_SECS)]
        delay: u64,

        /// Directory for the per-county JSON files
        #[arg(long, default_value = "data")]
        out: PathBuf,

        /// Show the browser window while scraping
        #[arg(long)]
        no_headless: bool,

        /// Database file path
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Process one company website: fetch, extract, verify, geocode, store
    Process {
        /// Company website URL
        url: String,

        /// Extraction model, openai[:model] or ollama[:model]
        #[arg(long, default_value = "openai")]
        model: String,

        /// DSP authorization snapshot for verification
        #[arg(long)]
        dsp_list: Option<PathBuf>,

        /// County hint for verification and the stored address
        #[arg(long)]
        county: Option<String>,

        /// Similarity threshold for verification
        #[arg(long, default_value_t = verify::DEFAULT_THRESHOLD)]
        threshold: f64,

        /// Print the extracted company without writing
        #[arg(long)]
        dry_run: bool,

        /// Skip DSP verification
        #[arg(long)]
        skip_verify: bool,
    },

    /// Fill in missing coordinates in raw county JSON files, in place
    Geocode {
        /// Files to geocode
        files: Vec<PathBuf>,
    },

    /// Check companies against the DSP authorization list
    Verify {
        #[command(subcommand)]
        command: VerifyCommands,
    },

    /// Show checkpoint contents and datastore statistics
    Status {
        /// Directory holding the checkpoint file
        #[arg(long, default_value = "data")]
        out: PathBuf,
    },

    /// List the scraping plan counties
    Counties,

    /// Manage the SQLite datastore
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
}

#[derive(Subcommand)]
enum VerifyCommands {
    /// Verify a single company name
    Name {
        /// Company name as displayed
        name: String,

        /// Restrict candidates to one county
        #[arg(long)]
        county: Option<String>,

        /// DSP authorization snapshot
        #[arg(long)]
        dsp_list: PathBuf,

        /// Similarity threshold
        #[arg(long, default_value_t = verify::DEFAULT_THRESHOLD)]
        threshold: f64,
    },

    /// Verify every stored company and update its verified flag
    Batch {
        /// DSP authorization snapshot
        #[arg(long)]
        dsp_list: PathBuf,

        /// Database file path
        #[arg(long)]
        db: Option<PathBuf>,

        /// Similarity threshold
        #[arg(long, default_value_t = verify::DEFAULT_THRESHOLD)]
        threshold: f64,

        /// Show flag changes without writing
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum DbCommands {
    /// Create the database schema
    Init,

    /// Show datastore statistics
    Stats,

    /// Print the database file path
    Path,
}

fn init_logger() {
    Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();
}

fn open_db(path: Option<&Path>) -> Result<Database> {
    match path {
        Some(path) => Database::open_at(path),
        None => Database::open(),
    }
}

/// Resolve the `--county`/`--counties`/`--all` selection into plan entries.
fn select_counties(
    one: Option<&str>,
    many: Option<&str>,
    all: bool,
) -> Result<Vec<&'static County>> {
    if all {
        return Ok(COUNTIES.iter().collect());
    }

    let mut selected: Vec<&'static County> = Vec::new();
    if let Some(name) = one {
        let county =
            counties::find(name).ok_or_else(|| anyhow!("Unknown county '{}'", name))?;
        selected.push(county);
    }
    if let Some(list) = many {
        for name in list.split(',') {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            let county =
                counties::find(name).ok_or_else(|| anyhow!("Unknown county '{}'", name))?;
            if !selected.iter().any(|c| c.code == county.code) {
                selected.push(county);
            }
        }
    }
    if selected.is_empty() {
        bail!("No counties selected. Use --county <NAME>, --counties <A,B,...> or --all.");
    }
    Ok(selected)
}

/// Ctrl-C flips a flag the orchestrator polls between cities and counties.
fn stop_flag() -> Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&flag);
    ctrlc::set_handler(move || {
        println!("\nStop requested, finishing the current city first...");
        handler_flag.store(true, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl-C handler")?;
    Ok(flag)
}

fn print_run_stats(stats: &RunStats) {
    println!("\nResults:");
    println!("  Counties completed: {}", stats.counties_done);
    println!("  Cities scraped:     {}", stats.cities_scraped);
    println!("  Businesses found:   {}", stats.businesses_found);
    if stats.scrape_failures > 0 {
        println!("  Scrape failures:    {}", stats.scrape_failures);
    }
    if stats.import_failures > 0 {
        println!("  Import failures:    {}", stats.import_failures);
    }
    if stats.import.processed > 0 {
        println!(
            "  Imported:           {} new, {} updated",
            stats.import.imported, stats.import.updated
        );
    }
    if stats.stopped {
        println!("\nStopped early. Re-run with --resume to continue.");
    }
}

fn print_import_stats(stats: &ImportStats, dry_run: bool) {
    println!("\nResults:");
    println!("  Processed:       {}", stats.processed);
    println!("  Imported:        {}", stats.imported);
    println!("  Updated:         {}", stats.updated);
    println!("  Directory skips: {}", stats.skipped_directory);
    println!("  Invalid skips:   {}", stats.skipped_invalid);
    println!("  Failed:          {}", stats.failed);
    if dry_run {
        println!("\n(Dry run - nothing was written)");
    }
}

fn print_company(company: &Company) {
    println!("\n{}", company.name);
    println!("{}", "-".repeat(company.name.chars().count().max(24)));
    if let Some(motto) = &company.motto {
        println!("Motto:    {}", motto);
    }
    if let Some(cui) = &company.fiscal_code {
        println!("CUI:      {}", cui);
    }
    if let Some(website) = &company.website {
        println!("Website:  {}", website);
    }
    for contact in &company.contacts {
        println!("Contact:  {} ({})", contact.value, contact.kind.as_str());
    }
    if !company.services.is_empty() {
        println!("Services: {}", company.services.join(", "));
    }
    for location in &company.locations {
        let mut line = location.address.clone();
        if let Some(city) = &location.city {
            line.push_str(&format!(", {}", city));
        }
        if let Some(county) = &location.county {
            line.push_str(&format!(" ({})", county));
        }
        println!("Address:  {}", line);
        if let (Some(lat), Some(lng)) = (location.latitude, location.longitude) {
            println!(
                "Coords:   {:.6}, {:.6} [{}]",
                lat,
                lng,
                location.coord_quality.as_str()
            );
        }
    }
    if company.is_non_stop {
        println!("Open:     non-stop");
    }
    if let Some(year) = company.founded_year {
        println!("Founded:  {}", year);
    }
    println!("Verified: {}", if company.verified { "yes" } else { "no" });
}

fn print_db_stats(db: &Database) -> Result<()> {
    let stats = db.stats()?;
    println!("Database: {}", db.path().display());
    println!("Companies: {} ({} verified)", stats.companies, stats.verified);
    println!("Contacts:  {}", stats.contacts);
    println!("Locations: {} ({} geocoded)", stats.locations, stats.geocoded);
    if !stats.by_county.is_empty() {
        println!();
        println!("{:<24} {:>10}", "COUNTY", "COMPANIES");
        println!("{}", "-".repeat(35));
        for (county, count) in &stats.by_county {
            println!("{:<24} {:>10}", county, count);
        }
    }
    if !stats.by_source.is_empty() {
        println!();
        println!("{:<24} {:>10}", "SOURCE", "COMPANIES");
        println!("{}", "-".repeat(35));
        for (source, count) in &stats.by_source {
            println!("{:<24} {:>10}", source, count);
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    init_logger();
    let cli = Cli::parse();

    match cli.command {
        Commands::Scrape {
            county,
            counties,
            all,
            resume,
            no_headless,
            out,
        } => {
            let selected = select_counties(county.as_deref(), counties.as_deref(), all)?;
            let stop = stop_flag()?;
            let store = JsonProgressStore::in_dir(&out);

            println!(
                "Scraping {} counties into {}...",
                selected.len(),
                out.display()
            );
            let mut scraper = MapsScraper::new(!no_headless)?;
            let options = RunOptions {
                out_dir: out,
                delay: Duration::from_secs(workflow::DEFAULT_DELAY_SECS),
                resume,
            };
            let stats = workflow::run(&mut scraper, &store, &selected, &options, None, &stop)?;
            print_run_stats(&stats);
        }

        Commands::Import {
            files,
            db,
            dry_run,
            enrich,
        } => {
            if files.is_empty() {
                bail!("No files given.");
            }
            let mut database = open_db(db.as_deref())?;
            database.ensure_initialized()?;

            let opts = ImportOptions { dry_run, enrich };
            let mut total = ImportStats::default();
            let mut failed_files = 0usize;
            for file in &files {
                println!("Importing {}...", file.display());
                match import_file(&mut database, file, &opts) {
                    Ok(stats) => total.merge(&stats),
                    Err(e) => {
                        error!("Failed to import {}: {:#}", file.display(), e);
                        failed_files += 1;
                    }
                }
            }
            print_import_stats(&total, dry_run);
            if failed_files > 0 {
                println!("  Unreadable files: {}", failed_files);
            }
        }

        Commands::Run {
            counties,
            all,
            resume,
            delay,
            out,
            no_headless,
            db,
        } => {
            let selected = select_counties(None, counties.as_deref(), all)?;
            let stop = stop_flag()?;
            let mut database = open_db(db.as_deref())?;
            database.ensure_initialized()?;
            let store = JsonProgressStore::in_dir(&out);

            println!(
                "Scrape + import for {} counties, {}s between counties...",
                selected.len(),
                delay
            );
            let mut scraper = MapsScraper::new(!no_headless)?;
            let options = RunOptions {
                out_dir: out,
                delay: Duration::from_secs(delay),
                resume,
            };
            let stats = workflow::run(
                &mut scraper,
                &store,
                &selected,
                &options,
                Some((&mut database, ImportOptions::default())),
                &stop,
            )?;
            print_run_stats(&stats);
        }

        Commands::Process {
            url,
            model,
            dsp_list,
            county,
            threshold,
            dry_run,
            skip_verify,
        } => {
            // Setup failures (bad county, missing API key, unreadable DSP
            // list, uninitialized datastore) surface before any network work.
            let county_hint = match county.as_deref() {
                Some(name) => {
                    let county = counties::find(name)
                        .ok_or_else(|| anyhow!("Unknown county '{}'", name))?;
                    Some(county.name.to_string())
                }
                None => None,
            };
            let extractor = create_extractor(&model)?;
            let verifier = match (&dsp_list, skip_verify) {
                (Some(path), false) => {
                    let list = DspList::load(path)?;
                    println!(
                        "Loaded {} authorized companies from {}",
                        list.companies.len(),
                        path.display()
                    );
                    Some(Verifier::new(list, threshold))
                }
                _ => None,
            };
            let mut database = if dry_run {
                None
            } else {
                let database = open_db(None)?;
                database.ensure_initialized()?;
                Some(database)
            };

            let fetcher = Fetcher::new()?;
            println!("Fetching {}...", url);
            let page = fetcher.fetch(&url)?;

            println!("Extracting with {}...", extractor.model_name());
            let extracted = extractor.extract(&page.text, &page.url)?;

            let verdict =
                check_directory(&extracted.company_name, &extracted.phones, Some(page.url.as_str()));
            if verdict.directory {
                bail!(
                    "'{}' looks like a business directory ({}), not storing it",
                    extracted.company_name,
                    verdict.reason
                );
            }

            let mut company = company_from_extracted(&extracted, &page.url);
            if let Some(hint) = &county_hint {
                if let Some(location) = company.locations.first_mut() {
                    if location.county.is_none() {
                        location.county = Some(hint.clone());
                    }
                }
            }
            company.validate()?;

            if let Some(verifier) = &verifier {
                let county_for_match = county_hint
                    .as_deref()
                    .or_else(|| company.locations.first().and_then(|l| l.county.as_deref()));
                let result = verifier.verify(
                    &company.name,
                    county_for_match,
                    company.fiscal_code.as_deref(),
                );
                println!(
                    "Verification: {} (score {:.1}, {})",
                    if result.verified { "verified" } else { "not verified" },
                    result.score,
                    result.method.as_str()
                );
                if let Some(closest) = result.matched.as_ref().or(result.closest.as_ref()) {
                    println!("  Closest DSP entry: {}", closest);
                }
                company.verified = result.verified;
            } else if !skip_verify {
                println!("No DSP list given, skipping verification.");
            }

            let company_name = company.name.clone();
            if let Some(location) = company.locations.first_mut() {
                if location.latitude.is_none() {
                    println!("Geocoding {}...", location.address);
                    let mut geocoder = Geocoder::new()?;
                    match geocoder.geocode(
                        Some(location.address.as_str()),
                        location.city.as_deref(),
                        location.county.as_deref(),
                        Some(company_name.as_str()),
                    ) {
                        Some((lat, lng, quality)) => {
                            location.latitude = Some(lat);
                            location.longitude = Some(lng);
                            location.coord_quality = quality;
                        }
                        None => println!("  No coordinates found."),
                    }
                }
            }

            print_company(&company);
            match database.as_mut() {
                Some(database) => {
                    let outcome = database.upsert_company(&company)?;
                    match outcome.action {
                        UpsertAction::Inserted => {
                            println!("\nStored as company #{}", outcome.company_id)
                        }
                        UpsertAction::Updated => {
                            println!("\nMerged into existing company #{}", outcome.company_id)
                        }
                    }
                }
                None => println!("\n(Dry run - nothing was written)"),
            }
        }

        Commands::Geocode { files } => {
            if files.is_empty() {
                bail!("No files given.");
            }
            let mut geocoder = Geocoder::new()?;
            for file in &files {
                println!("Geocoding {}...", file.display());
                match geocode_file(&mut geocoder, file) {
                    Ok(stats) => println!(
                        "  {} records: {} already had coordinates, {} geocoded, {} failed",
                        stats.total, stats.already, stats.geocoded, stats.failed
                    ),
                    Err(e) => error!("Failed to geocode {}: {:#}", file.display(), e),
                }
            }
        }

        Commands::Verify { command } => match command {
            VerifyCommands::Name {
                name,
                county,
                dsp_list,
                threshold,
            } => {
                let list = DspList::load(&dsp_list)?;
                println!("Loaded {} authorized companies", list.companies.len());
                let verifier = Verifier::new(list, threshold);
                let result = verifier.verify(&name, county.as_deref(), None);

                println!();
                println!("Name:     {}", name);
                println!("Verified: {}", if result.verified { "yes" } else { "no" });
                println!("Score:    {:.1}", result.score);
                println!("Method:   {}", result.method.as_str());
                match (&result.matched, &result.closest) {
                    (Some(matched), _) => println!("Matched:  {}", matched),
                    (None, Some(closest)) => println!("Closest:  {}", closest),
                    (None, None) => {}
                }
            }

            VerifyCommands::Batch {
                dsp_list,
                db,
                threshold,
                dry_run,
            } => {
                let database = open_db(db.as_deref())?;
                database.ensure_initialized()?;
                let list = DspList::load(&dsp_list)?;
                println!("Loaded {} authorized companies", list.companies.len());
                let verifier = Verifier::new(list, threshold);

                let companies = database.list_companies()?;
                let mut verified = 0usize;
                let mut changed = 0usize;
                for company in &companies {
                    let county = company
                        .locations
                        .first()
                        .and_then(|l| l.county.as_deref());
                    let result =
                        verifier.verify(&company.name, county, company.fiscal_code.as_deref());
                    if result.verified {
                        verified += 1;
                    }
                    if result.verified != company.verified {
                        changed += 1;
                        if dry_run {
                            println!(
                                "would mark {} as {} (score {:.1})",
                                company.name,
                                if result.verified { "verified" } else { "unverified" },
                                result.score
                            );
                        } else if let Some(id) = company.id {
                            database.set_verified(id, result.verified)?;
                        }
                    }
                }

                println!("\nResults:");
                println!("  Companies checked: {}", companies.len());
                println!("  Verified:          {}", verified);
                println!("  Not verified:      {}", companies.len() - verified);
                println!("  Flags changed:     {}", changed);
                if dry_run {
                    println!("\n(Dry run - flags were not written)");
                }
            }
        },

        Commands::Status { out } => {
            let store = JsonProgressStore::in_dir(&out);
            let progress = store.load()?;

            println!("Checkpoint ({})", store.path().display());
            println!(
                "  Started:          {}",
                progress.started_at.as_deref().unwrap_or("-")
            );
            println!(
                "  Last updated:     {}",
                progress.last_updated.as_deref().unwrap_or("-")
            );
            println!(
                "  Counties done:    {}/{}",
                progress.completed_counties.len(),
                COUNTIES.len()
            );
            println!("  Total businesses: {}", progress.total_businesses);
            if let Some(county) = &progress.current_county {
                println!(
                    "  In flight:        {} / {}",
                    county,
                    progress.current_city.as_deref().unwrap_or("-")
                );
            }
            if !progress.stats.is_empty() {
                println!();
                println!("  {:<24} {:>10}", "COUNTY", "BUSINESSES");
                for (county, count) in &progress.stats {
                    println!("  {:<24} {:>10}", county, count);
                }
            }

            let database = open_db(None)?;
            println!();
            match database.ensure_initialized() {
                Ok(()) => print_db_stats(&database)?,
                Err(_) => println!("Datastore not initialized (run 'funerar db init')."),
            }
        }

        Commands::Counties => {
            println!("{:<18} {:<5} CITIES", "COUNTY", "CODE");
            println!("{}", "-".repeat(72));
            for county in COUNTIES {
                println!(
                    "{:<18} {:<5} {}",
                    county.name,
                    county.code,
                    county.cities.join(", ")
                );
            }
            println!();
            println!(
                "{} counties, {} cities",
                COUNTIES.len(),
                counties::total_cities()
            );
        }

        Commands::Db { command } => match command {
            DbCommands::Init => {
                let database = open_db(None)?;
                database.init()?;
                println!("Database initialized at {}", database.path().display());
            }

            DbCommands::Stats => {
                let database = open_db(None)?;
                database.ensure_initialized()?;
                print_db_stats(&database)?;
            }

            DbCommands::Path => {
                let database = open_db(None)?;
                println!("{}", database.path().display());
            }
        },
    }

    Ok(())
}
