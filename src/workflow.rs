use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::Result;
use log::{error, info, warn};

use crate::counties::County;
use crate::db::Database;
use crate::import::{import_file, ImportOptions, ImportStats};
use crate::models::RawBusiness;
use crate::normalize::strip_diacritics;
use crate::progress::{Progress, ProgressStore};
use crate::scrape::{county_file, write_county_file, CityScraper};

/// Pause between counties. Plain sleep, Maps tolerates this pace fine.
pub const DEFAULT_DELAY_SECS: u64 = 10;

pub struct RunOptions {
    pub out_dir: PathBuf,
    pub delay: Duration,
    pub resume: bool,
}

#[derive(Debug, Default)]
pub struct RunStats {
    pub counties_done: usize,
    pub cities_scraped: usize,
    pub businesses_found: usize,
    pub scrape_failures: usize,
    pub import_failures: usize,
    pub import: ImportStats,
    pub stopped: bool,
}

/// Drives the county -> city scraping plan with checkpoints.
///
/// Counties whose output file already exists are not re-scraped: the file is
/// imported as-is (delete the file to force a fresh scrape). Otherwise cities
/// are scraped one at a time, the county file is rewritten and the checkpoint
/// saved after every city, so a killed run loses at most the city in flight.
/// The stop flag is honored between cities and between counties; the city in
/// flight always finishes first.
///
/// `import` carries the datastore when county files should be imported as
/// they complete; `None` is the scrape-only mode.
pub fn run(
    scraper: &mut dyn CityScraper,
    store: &dyn ProgressStore,
    counties: &[&County],
    opts: &RunOptions,
    mut import: Option<(&mut Database, ImportOptions)>,
    stop: &AtomicBool,
) -> Result<RunStats> {
    let mut progress = if opts.resume {
        store.load()?
    } else {
        Progress::default()
    };
    progress.begin();
    store.save(&progress)?;

    let mut stats = RunStats::default();

    for (idx, county) in counties.iter().enumerate() {
        if stop.load(Ordering::SeqCst) {
            info!("Stop requested, halting before {}", county.name);
            stats.stopped = true;
            break;
        }
        if progress.county_done(county.name) {
            info!("{} already completed, skipping", county.name);
            continue;
        }

        let path = county_file(&opts.out_dir, county);
        if path.exists() {
            info!(
                "{} already scraped ({}), skipping to import",
                county.name,
                path.display()
            );
            if let Some((db, import_opts)) = import.as_mut() {
                match import_file(db, &path, import_opts) {
                    Ok(file_stats) => {
                        stats.import.merge(&file_stats);
                        progress.mark_county_done(county.name, file_stats.processed as u64);
                        store.save(&progress)?;
                        stats.counties_done += 1;
                    }
                    Err(e) => {
                        error!("Failed to import {}: {:#}", path.display(), e);
                        stats.import_failures += 1;
                    }
                }
            }
            continue;
        }

        info!(
            "=== {} ({}) [{}/{}], {} cities ===",
            county.name,
            county.code,
            idx + 1,
            counties.len(),
            county.cities.len()
        );

        let mut records: Vec<RawBusiness> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut halted = false;

        for city in county.cities {
            if stop.load(Ordering::SeqCst) {
                info!("Stop requested, halting before {} ({})", city, county.name);
                halted = true;
                break;
            }
            if progress.city_done(county.name, city) {
                info!("{} ({}) already scraped, skipping", city, county.name);
                continue;
            }

            progress.set_current(county.name, Some(city));
            store.save(&progress)?;

            let found = match scraper.scrape_city(county, city) {
                Ok(found) => found,
                Err(e) => {
                    warn!("Failed to scrape {} ({}): {:#}", city, county.name, e);
                    stats.scrape_failures += 1;
                    continue;
                }
            };

            let mut added = 0u64;
            for business in found {
                if seen.insert(strip_diacritics(&business.name).to_lowercase()) {
                    records.push(business);
                    added += 1;
                }
            }
            write_county_file(&path, &records)?;
            progress.mark_city_done(county.name, city, added);
            store.save(&progress)?;
            stats.cities_scraped += 1;
            stats.businesses_found += added as usize;
            info!("{} ({}): {} businesses", city, county.name, added);
        }

        if halted {
            stats.stopped = true;
            store.save(&progress)?;
            break;
        }

        write_county_file(&path, &records)?;
        let mut county_ok = true;
        if let Some((db, import_opts)) = import.as_mut() {
            match import_file(db, &path, import_opts) {
                Ok(file_stats) => stats.import.merge(&file_stats),
                Err(e) => {
                    error!("Failed to import {}: {:#}", path.display(), e);
                    stats.import_failures += 1;
                    county_ok = false;
                }
            }
        }
        if county_ok {
            progress.mark_county_done(county.name, records.len() as u64);
            stats.counties_done += 1;
        } else {
            // Unmarked county: the next run retries the import off the
            // written file.
            progress.current_county = None;
            progress.current_city = None;
        }
        store.save(&progress)?;

        let more_to_come = idx + 1 < counties.len();
        if more_to_come && !stop.load(Ordering::SeqCst) && !opts.delay.is_zero() {
            info!("Waiting {}s before the next county", opts.delay.as_secs());
            thread::sleep(opts.delay);
        }
    }

    Ok(stats)
}

// --- Tests ---
