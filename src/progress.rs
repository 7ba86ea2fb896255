use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use log::{info, warn};
use serde::{Deserialize, Serialize};

/// Default checkpoint file name, created inside the scrape output directory.
pub const PROGRESS_FILE: &str = "scrape_progress.json";

// --- Checkpoint State ---

/// Checkpoint for a multi-county run. Saved after every city so an
/// interrupted run can resume without re-scraping finished work.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Progress {
    pub started_at: Option<String>,
    pub last_updated: Option<String>,
    pub completed_counties: Vec<String>,
    /// County name -> cities already scraped within it.
    pub completed_cities: BTreeMap<String, Vec<String>>,
    pub current_county: Option<String>,
    pub current_city: Option<String>,
    pub total_businesses: u64,
    /// County name -> businesses collected for it.
    pub stats: BTreeMap<String, u64>,
}

impl Progress {
    /// Stamps the start time on first use; resumed runs keep the original.
    pub fn begin(&mut self) {
        if self.started_at.is_none() {
            self.started_at = Some(Local::now().to_rfc3339());
        }
    }

    pub fn county_done(&self, county: &str) -> bool {
        self.completed_counties.iter().any(|c| c == county)
    }

    pub fn city_done(&self, county: &str, city: &str) -> bool {
        self.completed_cities
            .get(county)
            .map(|cities| cities.iter().any(|c| c == city))
            .unwrap_or(false)
    }

    pub fn set_current(&mut self, county: &str, city: Option<&str>) {
        self.current_county = Some(county.to_string());
        self.current_city = city.map(|c| c.to_string());
    }

    pub fn mark_city_done(&mut self, county: &str, city: &str, added: u64) {
        let cities = self.completed_cities.entry(county.to_string()).or_default();
        if !cities.iter().any(|c| c == city) {
            cities.push(city.to_string());
        }
        self.total_businesses += added;
    }

    pub fn mark_county_done(&mut self, county: &str, total_in_county: u64) {
        if !self.county_done(county) {
            self.completed_counties.push(county.to_string());
        }
        self.stats.insert(county.to_string(), total_in_county);
        self.current_county = None;
        self.current_city = None;
    }
}

// --- Persistence ---

/// Where checkpoints live. The orchestrator only talks to this trait, so
/// tests can swap in an in-memory store.
pub trait ProgressStore {
    fn load(&self) -> Result<Progress>;
    fn save(&self, progress: &Progress) -> Result<()>;
}

/// JSON-file checkpoint store.
pub struct JsonProgressStore {
    path: PathBuf,
}

impl JsonProgressStore {
    pub fn new(path: impl Into<PathBuf>) -> JsonProgressStore {
        JsonProgressStore { path: path.into() }
    }

    /// Store at the standard location inside an output directory.
    pub fn in_dir(dir: &Path) -> JsonProgressStore {
        JsonProgressStore::new(dir.join(PROGRESS_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ProgressStore for JsonProgressStore {
    /// Missing file means a fresh run; a corrupt file is logged and treated
    /// the same rather than aborting a 42-county scrape.
    fn load(&self) -> Result<Progress> {
        if !self.path.exists() {
            info!("No checkpoint at {}, starting fresh", self.path.display());
            return Ok(Progress::default());
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read checkpoint file {}", self.path.display()))?;
        match serde_json::from_str::<Progress>(&content) {
            Ok(progress) => {
                info!(
                    "Resuming checkpoint: {} counties done, {} businesses so far",
                    progress.completed_counties.len(),
                    progress.total_businesses
                );
                Ok(progress)
            }
            Err(e) => {
                warn!(
                    "Checkpoint file {} is corrupt ({}), starting fresh",
                    self.path.display(),
                    e
                );
                Ok(Progress::default())
            }
        }
    }

    fn save(&self, progress: &Progress) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create checkpoint directory {}", parent.display())
                })?;
            }
        }
        let mut stamped = progress.clone();
        stamped.last_updated = Some(Local::now().to_rfc3339());
        let json = serde_json::to_string_pretty(&stamped)
            .context("Failed to serialize checkpoint")?;
        fs::write(&self.path, json)
            .with_context(|| format!("Failed to write checkpoint file {}", self.path.display()))?;
        Ok(())
    }
}

// --- Tests ---

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn temp_store(tag: &str) -> JsonProgressStore {
        let path = env::temp_dir().join(format!(
            "funerar_progress_{}_{}.json",
            std::process::id(),
            tag
        ));
        let _ = fs::remove_file(&path);
        JsonProgressStore::new(path)
    }

    #[test]
    fn test_load_missing_file_starts_fresh() {
        let store = temp_store("missing");
        let progress = store.load().unwrap();
        assert!(progress.started_at.is_none());
        assert!(progress.completed_counties.is_empty());
        assert_eq!(progress.total_businesses, 0);
    }

    #[test]
    fn test_load_corrupt_file_starts_fresh() {
        let store = temp_store("corrupt");
        fs::write(store.path(), "{ not json").unwrap();
        let progress = store.load().unwrap();
        assert!(progress.completed_counties.is_empty());
        fs::remove_file(store.path()).unwrap();
    }

    #[test]
    fn test_save_and_reload_round_trip() {
        let store = temp_store("roundtrip");
        let mut progress = Progress::default();
        progress.begin();
        progress.set_current("Timiș", Some("Timișoara"));
        progress.mark_city_done("Timiș", "Timișoara", 12);
        progress.mark_city_done("Timiș", "Lugoj", 4);
        progress.mark_county_done("Timiș", 16);
        store.save(&progress).unwrap();

        let loaded = store.load().unwrap();
        assert!(loaded.started_at.is_some());
        assert!(loaded.last_updated.is_some());
        assert!(loaded.county_done("Timiș"));
        assert!(loaded.city_done("Timiș", "Lugoj"));
        assert!(!loaded.city_done("Arad", "Lugoj"));
        assert_eq!(loaded.total_businesses, 16);
        assert_eq!(loaded.stats.get("Timiș"), Some(&16));
        // County completion clears the in-flight markers.
        assert!(loaded.current_county.is_none());
        assert!(loaded.current_city.is_none());
        fs::remove_file(store.path()).unwrap();
    }

    #[test]
    fn test_camel_case_keys_on_disk() {
        let store = temp_store("keys");
        let mut progress = Progress::default();
        progress.begin();
        progress.mark_city_done("Arad", "Arad", 3);
        store.save(&progress).unwrap();

        let raw = fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("\"startedAt\""));
        assert!(raw.contains("\"lastUpdated\""));
        assert!(raw.contains("\"completedCities\""));
        assert!(raw.contains("\"totalBusinesses\""));
        assert!(!raw.contains("started_at"));
        fs::remove_file(store.path()).unwrap();
    }

    #[test]
    fn test_begin_keeps_existing_start() {
        let mut progress = Progress {
            started_at: Some("2025-01-01T00:00:00+02:00".to_string()),
            ..Progress::default()
        };
        progress.begin();
        assert_eq!(
            progress.started_at.as_deref(),
            Some("2025-01-01T00:00:00+02:00")
        );
    }

    #[test]
    fn test_mark_city_done_is_idempotent() {
        let mut progress = Progress::default();
        progress.mark_city_done("Cluj", "Dej", 5);
        progress.mark_city_done("Cluj", "Dej", 0);
        assert_eq!(progress.completed_cities.get("Cluj").unwrap().len(), 1);
        assert_eq!(progress.total_businesses, 5);
    }
}
