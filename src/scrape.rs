use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use headless_chrome::browser::default_executable;
use headless_chrome::{Browser, Element, LaunchOptions, Tab};
use log::{debug, info, warn};
use rand::Rng;
use regex::Regex;

use crate::address::parse_address;
use crate::counties::County;
use crate::geocode::{city_centroid, has_street_number};
use crate::models::{CoordQuality, RawBusiness};
use crate::normalize::{slugify, strip_diacritics};

const SEARCH_TERM: &str = "servicii funerare";
const MAX_SCROLLS: usize = 30;
const MAX_RESULTS: usize = 50;
const MAX_RESULTS_CAPITAL: usize = 150;

// Maps DOM hooks. Class names rotate every few months; data-item-id
// attributes have been stable for years.
const FEED_SELECTOR: &str = "[role='feed']";
const CARD_SELECTOR: &str = ".Nv2PK";
const CARD_NAME_SELECTOR: &str = ".qBF1Pd";
const CARD_CATEGORY_SELECTOR: &str = ".W4Efsd .W4Efsd span span";
const ADDRESS_SELECTOR: &str = "[data-item-id='address'] .Io6YTe";
const PHONE_SELECTOR: &str = "[data-item-id^='phone:'] .Io6YTe";
const WEBSITE_SELECTOR: &str = "[data-item-id='authority'] .Io6YTe";
const HOURS_SELECTOR: &str = "[data-item-id='oh'] .Io6YTe";
const RATING_SELECTOR: &str = ".F7nice";

const CONSENT_SELECTORS: &[&str] = &[
    "#L2AGLb",
    "button[aria-label='Accept all']",
    "button[aria-label='Acceptă tot']",
    "form[action*='consent'] button",
];

// Folded keyword tables for the listing filter. Diacritics are stripped from
// the inputs before matching, so the plain forms cover both spellings.
const FUNERAL_KEYWORDS: &[&str] = &[
    "funerar", "funerare", "funebre", "funeral", "pompe funebre", "casa funerara",
    "inmormantare", "inhumare", "deces", "decedat", "capela", "priveghi", "sicri",
    "sicriu", "repatriere", "incinerare", "crematoriu",
];

// Gravestone masons advertise "monumente funerare" but sell stone, not
// services. Excluded before the funeral keywords get a say.
const ALWAYS_EXCLUDE: &[&str] = &["monument", "monumente", "pietr", "marmur", "granit"];

const EXCLUDED_KEYWORDS: &[&str] = &[
    "florarie", "florar", "flori ", "cimitir", "cimitirul", "automat de",
    "self-service", "self service", "speed", "transport marfa",
];

const EXCLUDED_CATEGORIES: &[&str] = &[
    "florist", "florarie", "flower", "cemetery", "cimitir", "stone", "marble",
    "granite", "monument",
];

const NON_STOP_INDICATORS: &[&str] = &[
    "non-stop", "nonstop", "non stop", "24 de ore", "24 ore", "24h", "24/7",
    "24/24", "deschis 24", "open 24", "deschis non", "open non", "permanent",
];

/// Seam between the orchestrator and the browser, so runs can be exercised
/// without Chrome.
pub trait CityScraper {
    fn scrape_city(&mut self, county: &County, city: &str) -> Result<Vec<RawBusiness>>;
}

/// Scrapes funeral businesses off Google Maps search results, one city at a
/// time. Listings are filtered by the keyword heuristics before their detail
/// panels are opened.
pub struct MapsScraper {
    browser: Browser,
    tab: Option<Arc<Tab>>,
}

impl MapsScraper {
    pub fn new(headless: bool) -> Result<MapsScraper> {
        let launch_options = LaunchOptions {
            headless,
            sandbox: true,
            window_size: Some((1920, 1080)),
            idle_browser_timeout: Duration::from_secs(300),
            path: default_executable().ok(),
            ..Default::default()
        };

        let browser = Browser::new(launch_options)
            .context("Failed to launch Chrome. Make sure Chrome or Chromium is installed.")?;

        Ok(MapsScraper { browser, tab: None })
    }

    // One tab, reused across cities. A fresh tab per search leaks renderer
    // processes over a 42-county run.
    fn tab(&mut self) -> Result<Arc<Tab>> {
        if let Some(tab) = &self.tab {
            return Ok(tab.clone());
        }
        let tab = self
            .browser
            .new_tab()
            .context("Failed to open a browser tab")?;
        self.tab = Some(tab.clone());
        Ok(tab)
    }
}

impl CityScraper for MapsScraper {
    fn scrape_city(&mut self, county: &County, city: &str) -> Result<Vec<RawBusiness>> {
        let tab = self.tab()?;
        let url = search_url(city, county.name);
        info!("searching Maps for '{}' in {} ({})", SEARCH_TERM, city, county.name);

        tab.navigate_to(&url)
            .context("Failed to open the Maps search page")?;
        thread::sleep(Duration::from_secs(3));
        accept_consent(&tab);

        // Small towns often open the lone business panel directly, with no
        // results feed at all.
        if tab.find_elements(FEED_SELECTOR).unwrap_or_default().is_empty() {
            if let Some(name) = panel_title(&tab) {
                info!("single listing opened directly: {}", name);
                let listing = Listing { name, category: None };
                return Ok(extract_details(&tab, &listing, county, city)
                    .into_iter()
                    .collect());
            }
            warn!("no results for {} ({})", city, county.name);
            return Ok(Vec::new());
        }

        let cap = if strip_diacritics(city).to_lowercase().contains("bucuresti") {
            MAX_RESULTS_CAPITAL
        } else {
            MAX_RESULTS
        };
        let listings = collect_listings(&tab, cap);
        info!("{} candidate listings in {}", listings.len(), city);

        let mut results = Vec::new();
        for (i, listing) in listings.iter().enumerate() {
            debug!("extracting [{}/{}] {}", i + 1, listings.len(), listing.name);
            if !open_listing(&tab, &listing.name) {
                warn!("could not reopen listing '{}'", listing.name);
                continue;
            }
            if let Some(raw) = extract_details(&tab, listing, county, city) {
                results.push(raw);
            }
            let pause = rand::thread_rng().gen_range(300..700);
            thread::sleep(Duration::from_millis(pause));
        }

        info!("{}: kept {} of {} listings", city, results.len(), listings.len());
        Ok(results)
    }
}

struct Listing {
    name: String,
    category: Option<String>,
}

fn search_url(city: &str, county: &str) -> String {
    // Locking the viewport to the city centroid keeps Maps from padding thin
    // result sets with businesses from the other end of the country.
    match city_centroid(city) {
        Some((lat, lng)) => {
            let term = SEARCH_TERM.replace(' ', "+");
            format!("https://www.google.com/maps/search/{term}/@{lat},{lng},13z")
        }
        None => {
            let term = strip_diacritics(&format!("{SEARCH_TERM} {city} {county}"))
                .to_lowercase()
                .replace(' ', "+");
            format!("https://www.google.com/maps/search/{term}")
        }
    }
}

fn accept_consent(tab: &Tab) {
    for selector in CONSENT_SELECTORS {
        if let Ok(button) = tab.find_element(selector) {
            if button.click().is_ok() {
                debug!("accepted the cookie consent dialog");
                thread::sleep(Duration::from_secs(1));
                return;
            }
        }
    }
}

// Scroll the results feed until nothing new shows up (or the cap is hit),
// filtering every card through the funeral-business heuristics.
fn collect_listings(tab: &Tab, cap: usize) -> Vec<Listing> {
    let mut listings: Vec<Listing> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut filtered = 0usize;
    let mut idle_scrolls = 0usize;

    for round in 0..MAX_SCROLLS {
        let cards = tab.find_elements(CARD_SELECTOR).unwrap_or_default();
        let mut new_found = 0usize;
        for card in &cards {
            let Some(name) = card_name(card) else { continue };
            if !seen.insert(name.clone()) {
                continue;
            }
            let category = card
                .find_element(CARD_CATEGORY_SELECTOR)
                .ok()
                .and_then(|el| el.get_inner_text().ok())
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty());
            if !is_funeral_business(&name, category.as_deref()) {
                filtered += 1;
                debug!("filtered out: {}", name);
                continue;
            }
            new_found += 1;
            listings.push(Listing { name, category });
        }

        debug!(
            "scroll {}: {} new listings ({} kept, {} filtered)",
            round + 1,
            new_found,
            listings.len(),
            filtered
        );
        if listings.len() >= cap {
            info!("hit the {} listing cap, stopping collection", cap);
            break;
        }
        if new_found == 0 {
            idle_scrolls += 1;
            if idle_scrolls >= 2 {
                debug!("no new listings after {} scrolls, end of results", idle_scrolls);
                break;
            }
        } else {
            idle_scrolls = 0;
        }

        scroll_feed(tab);
        let pause = rand::thread_rng().gen_range(800..1200);
        thread::sleep(Duration::from_millis(pause));
    }

    listings.truncate(cap);
    listings
}

fn card_name(card: &Element) -> Option<String> {
    let text = card
        .find_element(CARD_NAME_SELECTOR)
        .ok()
        .and_then(|el| el.get_inner_text().ok())
        .or_else(|| {
            card.get_inner_text()
                .ok()
                .and_then(|t| t.lines().next().map(str::to_string))
        })?;
    let name = clean_business_name(&text);
    if name.is_empty() { None } else { Some(name) }
}

fn scroll_feed(tab: &Tab) {
    let js = r#"(function() {
        var feed = document.querySelector('[role="feed"]');
        if (feed) { feed.scrollTop = feed.scrollTop + 1000; }
    })()"#;
    if tab.evaluate(js, false).is_err() {
        let _ = tab.press_key("End");
    }
}

// Click the card matching `name` and wait for its detail panel. The panel
// swaps content in place, so the title has to be polled until it matches.
fn open_listing(tab: &Tab, name: &str) -> bool {
    let cards = tab.find_elements(CARD_SELECTOR).unwrap_or_default();
    for card in &cards {
        if card_name(card).as_deref() != Some(name) {
            continue;
        }
        let _ = card.scroll_into_view();
        if card.click().is_err() {
            return false;
        }
        for _ in 0..8 {
            thread::sleep(Duration::from_millis(500));
            if let Some(title) = panel_title(tab) {
                if title == name || folded_prefix_match(&title, name) {
                    return true;
                }
            }
        }
        return panel_title(tab).is_some();
    }
    false
}

fn panel_title(tab: &Tab) -> Option<String> {
    for selector in ["h1.DUwDvf", "h1.fontHeadlineLarge"] {
        if let Ok(el) = tab.find_element(selector) {
            if let Ok(text) = el.get_inner_text() {
                let name = clean_business_name(&text);
                if !name.is_empty() {
                    return Some(name);
                }
            }
        }
    }
    None
}

fn panel_text(tab: &Tab, selector: &str) -> Option<String> {
    let text = tab.find_element(selector).ok()?.get_inner_text().ok()?;
    let text = text.trim().to_string();
    if text.is_empty() { None } else { Some(text) }
}

// Read the open detail panel into a RawBusiness. Returns None when the
// address places the listing in a different city than the one queried.
fn extract_details(
    tab: &Tab,
    listing: &Listing,
    county: &County,
    city: &str,
) -> Option<RawBusiness> {
    let address = panel_text(tab, ADDRESS_SELECTOR);
    let phone = panel_text(tab, PHONE_SELECTOR);
    let website = panel_text(tab, WEBSITE_SELECTOR).map(|w| {
        if w.starts_with("http") { w } else { format!("https://{w}") }
    });
    let hours = panel_text(tab, HOURS_SELECTOR);

    let parsed_city = address.as_deref().and_then(|a| parse_address(a).0);
    if let Some(addr) = &address {
        let in_city = city_matches(city, addr)
            || parsed_city.as_deref().map(|p| city_matches(city, p)).unwrap_or(false);
        if !in_city {
            info!("wrong location, skipping '{}' ({})", listing.name, addr);
            return None;
        }
    }

    let mut is_non_stop = hours.as_deref().map(detect_non_stop).unwrap_or(false);
    if !is_non_stop {
        if let Some(main) = panel_text(tab, "[role='main']") {
            is_non_stop = detect_non_stop(&main);
        }
    }

    let (rating, review_count) = panel_text(tab, RATING_SELECTOR)
        .as_deref()
        .map(parse_rating_block)
        .unwrap_or((None, None));

    let url = tab.get_url();
    let coords = parse_maps_coords(&url);
    let coord_quality = coords.map(|(_, _, pin)| {
        if pin && address.as_deref().map(has_street_number).unwrap_or(false) {
            CoordQuality::Exact
        } else {
            CoordQuality::Approximate
        }
    });

    Some(RawBusiness {
        name: listing.name.clone(),
        address,
        city: parsed_city.or_else(|| Some(city.to_string())),
        county: Some(county.name.to_string()),
        phone,
        website,
        rating,
        review_count,
        business_hours: hours,
        is_non_stop,
        category: listing.category.clone(),
        latitude: coords.map(|(lat, _, _)| lat),
        longitude: coords.map(|(_, lng, _)| lng),
        place_id: place_id_from_url(&url),
        coord_quality,
        email: None,
        fiscal_code: None,
        description: None,
        services: Vec::new(),
    })
}

// --- Listing heuristics ---

/// Decide whether a Maps listing is a funeral service provider. Checked in
/// order: the always-exclude guard, the category, the name, then the
/// exclusion lists; an unmatched name is kept.
pub fn is_funeral_business(name: &str, category: Option<&str>) -> bool {
    let name = strip_diacritics(name).to_lowercase();
    let category = category
        .map(|c| strip_diacritics(c).to_lowercase())
        .unwrap_or_default();

    if ALWAYS_EXCLUDE.iter().any(|kw| name.contains(kw)) {
        return false;
    }
    // Trust the Maps category first: a flower shop categorized "pompe
    // funebre" really does funerals.
    if FUNERAL_KEYWORDS.iter().any(|kw| category.contains(kw)) {
        return true;
    }
    if FUNERAL_KEYWORDS.iter().any(|kw| name.contains(kw)) {
        return true;
    }
    if EXCLUDED_KEYWORDS.iter().any(|kw| name.contains(kw)) {
        return false;
    }
    if EXCLUDED_CATEGORIES.iter().any(|kw| category.contains(kw)) {
        return false;
    }
    true
}

pub fn detect_non_stop(text: &str) -> bool {
    let folded = strip_diacritics(text).to_lowercase();
    NON_STOP_INDICATORS.iter().any(|ind| folded.contains(ind))
}

/// Collapse whitespace runs and strip decorative separators off both ends.
pub fn clean_business_name(name: &str) -> String {
    let collapsed = name.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_matches(|c: char| matches!(c, '-' | '|' | '·' | ',' | '–') || c.is_whitespace())
        .to_string()
}

/// Whole-word city match on folded text. Romanian street names use genitive
/// forms ("Șoseaua Giurgiului"), so a plain substring test would claim half
/// of Bucharest for Giurgiu.
pub fn city_matches(city: &str, text: &str) -> bool {
    let needle = strip_diacritics(city).to_lowercase();
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    let haystack = strip_diacritics(text).to_lowercase();

    let mut from = 0;
    while let Some(pos) = haystack[from..].find(needle) {
        let at = from + pos;
        let end = at + needle.len();
        let before_ok = haystack[..at]
            .chars()
            .next_back()
            .map(|c| !c.is_alphabetic())
            .unwrap_or(true);
        let after_ok = haystack[end..]
            .chars()
            .next()
            .map(|c| !c.is_alphabetic())
            .unwrap_or(true);
        if before_ok && after_ok {
            return true;
        }
        from = end;
    }
    false
}

/// Coordinates from a Maps place URL. The `!3d..!4d..` pair is the pin
/// itself; the `@lat,lng` form is only the viewport center. Returns
/// (lat, lng, is_pin).
pub fn parse_maps_coords(url: &str) -> Option<(f64, f64, bool)> {
    if let Ok(re) = Regex::new(r"!3d(-?\d+\.\d+)!4d(-?\d+\.\d+)") {
        if let Some(cap) = re.captures(url) {
            if let (Ok(lat), Ok(lng)) = (cap[1].parse::<f64>(), cap[2].parse::<f64>()) {
                return Some((lat, lng, true));
            }
        }
    }
    if let Ok(re) = Regex::new(r"@(-?\d+\.\d+),(-?\d+\.\d+)") {
        if let Some(cap) = re.captures(url) {
            if let (Ok(lat), Ok(lng)) = (cap[1].parse::<f64>(), cap[2].parse::<f64>()) {
                return Some((lat, lng, false));
            }
        }
    }
    None
}

pub fn place_id_from_url(url: &str) -> Option<String> {
    let re = Regex::new(r"!1s(0x[0-9a-fA-F]+:[0-9a-fA-Fx]+)").ok()?;
    re.captures(url).map(|cap| cap[1].to_string())
}

// Maps renders the header as "4,8(12 recenzii)" with a Romanian locale.
fn parse_rating_block(text: &str) -> (Option<f64>, Option<i64>) {
    let rating = Regex::new(r"(\d[.,]\d)")
        .ok()
        .and_then(|re| re.captures(text).map(|c| c[1].replace(',', ".")))
        .and_then(|s| s.parse().ok());
    let count = Regex::new(r"\((\d[\d.,]*)\)")
        .ok()
        .and_then(|re| re.captures(text).map(|c| c[1].replace(['.', ','], "")))
        .and_then(|s| s.parse().ok());
    (rating, count)
}

fn folded_prefix_match(a: &str, b: &str) -> bool {
    let fa: String = strip_diacritics(a).to_lowercase().chars().take(20).collect();
    let fb: String = strip_diacritics(b).to_lowercase().chars().take(20).collect();
    !fa.is_empty() && fa == fb
}

// --- Output files ---

pub fn county_file(out_dir: &Path, county: &County) -> PathBuf {
    out_dir.join(format!("maps_{}.json", slugify(county.name)))
}

pub fn write_county_file(path: &Path, records: &[RawBusiness]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }
    let json = serde_json::to_string_pretty(records).context("serializing scraped records")?;
    fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counties;

    #[test]
    fn test_funeral_filter_order() {
        // Always-exclude beats a funeral keyword in the same name
        assert!(!is_funeral_business("Monumente Funerare Stan", None));
        // Category rescues a name the exclusion list would drop
        assert!(is_funeral_business("Florăria Anda", Some("Pompe funebre")));
        assert!(is_funeral_business("Casa Funerară Eden", None));
        assert!(is_funeral_business("Servicii Complete Anubis SRL", Some("Funeral home")));
        assert!(!is_funeral_business("Florăria Magnolia", Some("Florist")));
        assert!(!is_funeral_business("Cimitirul Bellu", None));
        // Unmatched names are kept
        assert!(is_funeral_business("SC Transilvania SRL", None));
    }

    #[test]
    fn test_detect_non_stop() {
        assert!(detect_non_stop("Deschis 24 de ore"));
        assert!(detect_non_stop("Program: NON STOP"));
        assert!(detect_non_stop("disponibil 24/24"));
        assert!(detect_non_stop("Asistență permanentă"));
        assert!(!detect_non_stop("luni-vineri 9-17"));
    }

    #[test]
    fn test_clean_business_name() {
        assert_eq!(
            clean_business_name("  Casa   Funerară  Anubis - "),
            "Casa Funerară Anubis"
        );
        assert_eq!(clean_business_name("Pompe Funebre |"), "Pompe Funebre");
        assert_eq!(clean_business_name("\nEden\n"), "Eden");
    }

    #[test]
    fn test_city_matches_whole_words_only() {
        // "Giurgiului" is a Bucharest street, not the city of Giurgiu
        assert!(!city_matches("Giurgiu", "Șoseaua Giurgiului 120, București"));
        assert!(city_matches("Giurgiu", "Strada Mihai Viteazul 3, Giurgiu 080046"));
        assert!(city_matches("Timișoara", "Calea Lugojului 45, Timisoara"));
        assert!(!city_matches("Arad", "Strada Unirii 10, Oradea"));
    }

    #[test]
    fn test_parse_maps_coords_prefers_pin() {
        let place = "https://www.google.com/maps/place/Anubis/@45.75,21.22,17z/data=!3m1!4b1!8m2!3d45.7538355!4d21.2257474";
        assert_eq!(parse_maps_coords(place), Some((45.7538355, 21.2257474, true)));

        let viewport = "https://www.google.com/maps/search/servicii+funerare/@45.7489,21.2087,13z";
        assert_eq!(parse_maps_coords(viewport), Some((45.7489, 21.2087, false)));

        assert_eq!(parse_maps_coords("https://www.google.com/maps"), None);
    }

    #[test]
    fn test_place_id_from_url() {
        let url = "https://www.google.com/maps/place/X/data=!1s0x4745677dcb0fb5a7:0x631846d1c9e19a42!8m2";
        assert_eq!(
            place_id_from_url(url).as_deref(),
            Some("0x4745677dcb0fb5a7:0x631846d1c9e19a42")
        );
        assert_eq!(place_id_from_url("https://www.google.com/maps"), None);
    }

    #[test]
    fn test_parse_rating_block() {
        assert_eq!(parse_rating_block("4,8(12)"), (Some(4.8), Some(12)));
        assert_eq!(parse_rating_block("4.5 (1.234)"), (Some(4.5), Some(1234)));
        assert_eq!(parse_rating_block("Fără recenzii"), (None, None));
    }

    #[test]
    fn test_search_url_locks_known_cities_to_centroid() {
        let url = search_url("Timișoara", "Timiș");
        assert!(url.starts_with("https://www.google.com/maps/search/servicii+funerare/@"));
        assert!(url.ends_with(",13z"));

        // No centroid on file falls back to a plain text search
        let url = search_url("Recaș", "Timiș");
        assert_eq!(
            url,
            "https://www.google.com/maps/search/servicii+funerare+recas+timis"
        );
    }

    #[test]
    fn test_county_file_name() {
        let county = counties::find("TM").expect("county");
        assert_eq!(
            county_file(Path::new("data"), county),
            PathBuf::from("data/maps_timis.json")
        );
    }

    #[test]
    #[ignore] // Requires Chrome and network access
    fn test_scrape_city_live() {
        let county = counties::find("Timiș").expect("county");
        let mut scraper = MapsScraper::new(true).expect("Failed to launch the browser");
        let results = scraper.scrape_city(county, "Timișoara").expect("scrape");
        assert!(!results.is_empty());
    }
}
