use std::fs;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use log::{debug, warn};
use regex::Regex;
use reqwest::blocking::Client;
use serde::Deserialize;

use crate::address::STREET_PREFIXES;
use crate::models::{CoordQuality, RawBusiness};
use crate::normalize::strip_diacritics;

const BASE_URL: &str = "https://nominatim.openstreetmap.org/search";
const USER_AGENT: &str = concat!("funerar/", env!("CARGO_PKG_VERSION"));
const MIN_DELAY: Duration = Duration::from_secs(1);
const TIMEOUT: Duration = Duration::from_secs(10);

// County-capital and major-city centroids, keyed by folded city name. Keeps
// the common "city only" case off the network entirely.
const CITY_CENTROIDS: &[(&str, f64, f64)] = &[
    ("timisoara", 45.7538355, 21.2257474),
    ("bucuresti", 44.4268, 26.1025),
    ("bucharest", 44.4268, 26.1025),
    ("cluj-napoca", 46.7712, 23.6236),
    ("cluj", 46.7712, 23.6236),
    ("iasi", 47.1585, 27.6014),
    ("constanta", 44.1598, 28.6348),
    ("craiova", 44.3302, 23.7949),
    ("brasov", 45.6427, 25.5887),
    ("galati", 45.4353, 28.0080),
    ("ploiesti", 44.9366, 26.0134),
    ("oradea", 47.0465, 21.9189),
    ("braila", 45.2692, 27.9575),
    ("arad", 46.1866, 21.3123),
    ("pitesti", 44.8565, 24.8692),
    ("sibiu", 45.7983, 24.1256),
    ("bacau", 46.5670, 26.9146),
    ("targu mures", 46.5386, 24.5579),
    ("baia mare", 47.6567, 23.5850),
    ("buzau", 45.1500, 26.8333),
    ("botosani", 47.7486, 26.6694),
    ("satu mare", 47.7928, 22.8856),
    ("ramnicu valcea", 45.1047, 24.3693),
    ("drobeta-turnu severin", 44.6369, 22.6597),
    ("suceava", 47.6514, 26.2556),
    ("piatra neamt", 46.9275, 26.3658),
    ("targu jiu", 45.0378, 23.2736),
    ("focsani", 45.6967, 27.1833),
    ("tulcea", 45.1667, 28.8000),
    ("resita", 45.3006, 21.8894),
    ("targoviste", 44.9253, 25.4567),
    ("medias", 46.1667, 24.3500),
    ("giurgiu", 43.9037, 25.9699),
    ("deva", 45.8833, 22.9000),
    ("hunedoara", 45.7500, 22.9167),
    ("zalau", 47.1833, 23.0500),
    ("alba iulia", 46.0667, 23.5833),
    ("bistrita", 47.1333, 24.5000),
    ("vaslui", 46.6333, 27.7333),
    ("slobozia", 44.5667, 27.3667),
    ("calarasi", 44.2000, 27.3333),
    ("alexandria", 43.9833, 25.3333),
    ("miercurea ciuc", 46.3500, 25.8000),
    ("sfantu gheorghe", 45.8667, 25.7833),
];

#[derive(Debug, Deserialize)]
struct SearchHit {
    lat: String,
    lon: String,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct GeocodeStats {
    pub total: usize,
    pub already: usize,
    pub geocoded: usize,
    pub failed: usize,
}

/// Nominatim-backed geocoder with a strict strategy ladder and a blocking
/// one-request-per-second limiter. One attempt per strategy, no retries.
pub struct Geocoder {
    client: Client,
    last_request: Option<Instant>,
}

impl Geocoder {
    pub fn new() -> Result<Geocoder> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(TIMEOUT)
            .build()
            .context("building geocoding HTTP client")?;
        Ok(Geocoder { client, last_request: None })
    }

    /// Walk the ladder: company name + city, full address, street-only
    /// retry, centroid table, city-level query. The first three are `Exact`
    /// only when the address carries a street number; centroid and
    /// city-level hits are always `Approximate`.
    pub fn geocode(
        &mut self,
        address: Option<&str>,
        city: Option<&str>,
        county: Option<&str>,
        company_name: Option<&str>,
    ) -> Option<(f64, f64, CoordQuality)> {
        let street_quality = if address.map_or(false, has_street_number) {
            CoordQuality::Exact
        } else {
            CoordQuality::Approximate
        };

        if let (Some(name), Some(city)) = (company_name, city) {
            let query = compose_query(&[Some(name), Some(city), county]);
            if let Some((lat, lon)) = self.search(&query) {
                return Some((lat, lon, street_quality));
            }
        }

        if let Some(address) = address {
            let city_part = city.filter(|c| !folded_contains(address, c));
            let query = compose_query(&[Some(address), city_part, county]);
            if let Some((lat, lon)) = self.search(&query) {
                return Some((lat, lon, street_quality));
            }

            if let Some(street) = street_part(address) {
                let query = compose_query(&[Some(street.as_str()), city]);
                if let Some((lat, lon)) = self.search(&query) {
                    return Some((lat, lon, street_quality));
                }
            }
        }

        if let Some(city) = city {
            if let Some((lat, lon)) = city_centroid(city) {
                debug!("centroid hit for '{city}'");
                return Some((lat, lon, CoordQuality::Approximate));
            }
            let query = compose_query(&[Some(city), county]);
            if let Some((lat, lon)) = self.search(&query) {
                return Some((lat, lon, CoordQuality::Approximate));
            }
        }

        None
    }

    fn search(&mut self, query: &str) -> Option<(f64, f64)> {
        self.throttle();
        debug!("geocoding query: {query}");
        let result = self
            .client
            .get(BASE_URL)
            .query(&[
                ("q", query),
                ("format", "json"),
                ("limit", "1"),
                ("countrycodes", "ro"),
                ("addressdetails", "1"),
            ])
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.json::<Vec<SearchHit>>());

        match result {
            Ok(hits) => hits.into_iter().next().and_then(|hit| {
                let lat = hit.lat.parse().ok()?;
                let lon = hit.lon.parse().ok()?;
                Some((lat, lon))
            }),
            Err(err) => {
                warn!("geocoding query '{query}' failed: {err}");
                None
            }
        }
    }

    fn throttle(&mut self) {
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < MIN_DELAY {
                thread::sleep(MIN_DELAY - elapsed);
            }
        }
        self.last_request = Some(Instant::now());
    }
}

/// Fill missing coordinates in a per-county raw JSON file, in place.
/// Records already `exact` or `approximate` are left alone; records the
/// ladder cannot place are tagged `none` and retried on the next pass.
pub fn geocode_file(geocoder: &mut Geocoder, path: &Path) -> Result<GeocodeStats> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let mut records: Vec<RawBusiness> = serde_json::from_str(&text)
        .with_context(|| format!("parsing {}", path.display()))?;

    let mut stats = GeocodeStats::default();
    for record in &mut records {
        stats.total += 1;
        let placed = matches!(
            record.coord_quality,
            Some(CoordQuality::Exact) | Some(CoordQuality::Approximate)
        );
        if placed && record.latitude.is_some() {
            stats.already += 1;
            continue;
        }
        let outcome = geocoder.geocode(
            record.address.as_deref(),
            record.city.as_deref(),
            record.county.as_deref(),
            Some(&record.name),
        );
        match outcome {
            Some((lat, lon, quality)) => {
                record.latitude = Some(lat);
                record.longitude = Some(lon);
                record.coord_quality = Some(quality);
                stats.geocoded += 1;
            }
            None => {
                record.coord_quality = Some(CoordQuality::Nothing);
                stats.failed += 1;
            }
        }
    }

    let json = serde_json::to_string_pretty(&records)?;
    fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
    Ok(stats)
}

/// A street number between 1 and 4 digits, optionally with a letter suffix.
/// Word boundaries keep postal codes (5-6 digit runs) from matching.
pub fn has_street_number(address: &str) -> bool {
    Regex::new(r"\b\d{1,4}[A-Za-z]?\b")
        .map(|re| re.is_match(address))
        .unwrap_or(false)
}

pub fn city_centroid(city: &str) -> Option<(f64, f64)> {
    let folded = strip_diacritics(city).to_lowercase();
    let folded = folded.trim();
    CITY_CENTROIDS
        .iter()
        .find(|(name, _, _)| *name == folded)
        .map(|(_, lat, lon)| (*lat, *lon))
}

fn compose_query(parts: &[Option<&str>]) -> String {
    let mut out: Vec<&str> = parts.iter().copied().flatten().collect();
    out.push("Romania");
    out.join(", ")
}

fn folded_contains(haystack: &str, needle: &str) -> bool {
    strip_diacritics(haystack)
        .to_lowercase()
        .contains(&strip_diacritics(needle).to_lowercase())
}

// Reduce an address to its leading street fragment: parenthetical and
// bracketed asides dropped, everything after the first comma cut. Only
// returned when it actually starts with a street-type prefix.
fn street_part(address: &str) -> Option<String> {
    let re_paren = Regex::new(r"\(.*?\)").ok()?;
    let re_bracket = Regex::new(r"\[.*?\]").ok()?;
    let cleaned = re_paren.replace_all(address, "");
    let cleaned = re_bracket.replace_all(&cleaned, "");
    let street = cleaned.split(',').next()?.trim().to_string();
    let folded = strip_diacritics(&street).to_lowercase();
    if STREET_PREFIXES.iter().any(|p| folded.starts_with(p)) {
        Some(street)
    } else {
        None
    }
}
