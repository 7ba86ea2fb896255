use std::collections::HashSet;

use crate::normalize::{phone_tail, strip_diacritics};

// Scraped results and LLM extractions both drag in aggregator portals that
// look like companies. These rules separate them; order matters, first hit
// wins, every verdict carries the reason that produced it.

const MAX_PHONES: usize = 5;

const NAME_PATTERNS: &[&str] = &[
    ".ro", ".com", ".net", "info", "portal", "online", "lista", "director",
    "firme", "companies", "ghid",
];

const URL_PATTERNS: &[&str] = &[
    "/info/", "/listings/", "/directory/", "/catalog/", "/firme/",
    "/companies/", "/lista/", "/list/", "/results/", "/search/",
    "/categorie/", "/category/", "/pompe_funebre/", "/servicii_funerare/",
];

const DOMAIN_BLOCKLIST: &[&str] = &[
    "timisoreni.ro", "oradeni.ro", "clujeni.ro", "bucuresteni.ro",
];

#[derive(Debug, Clone)]
pub struct Verdict {
    pub directory: bool,
    pub reason: String,
}

impl Verdict {
    fn directory(reason: String) -> Verdict {
        Verdict { directory: true, reason }
    }
}

/// Decide whether a record is a listing portal rather than a real company.
pub fn check_directory(name: &str, phones: &[String], url: Option<&str>) -> Verdict {
    let phone_count = distinct_phone_count(phones);
    if phone_count > MAX_PHONES {
        return Verdict::directory(format!("{phone_count} distinct phone numbers listed"));
    }

    let folded_name = strip_diacritics(name).to_lowercase();
    for pattern in NAME_PATTERNS {
        if folded_name.contains(pattern) {
            return Verdict::directory(format!("name contains '{pattern}'"));
        }
    }

    if let Some(url) = url {
        let lowered = url.to_lowercase();
        for pattern in URL_PATTERNS {
            if lowered.contains(pattern) {
                return Verdict::directory(format!("listing path '{pattern}'"));
            }
        }
        if let Some(domain) = domain_of(&lowered) {
            if DOMAIN_BLOCKLIST.contains(&domain.as_str()) {
                return Verdict::directory(format!("known directory domain '{domain}'"));
            }
        }
    }

    Verdict { directory: false, reason: "real company".to_string() }
}

// Distinctness by the last-nine-digit tail, so "+40 7xx" and "07xx"
// formattings of one number count once.
fn distinct_phone_count(phones: &[String]) -> usize {
    phones
        .iter()
        .map(|p| phone_tail(p))
        .filter(|d| !d.is_empty())
        .collect::<HashSet<_>>()
        .len()
}

fn domain_of(url: &str) -> Option<String> {
    let trimmed = url.trim();
    let rest = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);
    let host = rest.split(['/', '?', '#']).next()?;
    let host = host.split(':').next()?;
    let host = host.strip_prefix("www.").unwrap_or(host);
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phones(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_too_many_phones_is_always_a_directory() {
        let many = phones(&[
            "0721000001", "0721000002", "0721000003",
            "0721000004", "0721000005", "0721000006",
        ]);
        let v = check_directory("Servicii Funerare Pop", &many, None);
        assert!(v.directory);
        assert!(v.reason.contains("6 distinct"));
    }

    #[test]
    fn test_five_phones_is_still_a_company() {
        let five = phones(&[
            "0721000001", "0721000002", "0721000003",
            "0721000004", "0721000005",
        ]);
        let v = check_directory("Servicii Funerare Pop", &five, None);
        assert!(!v.directory);
    }

    #[test]
    fn test_duplicate_formattings_count_once() {
        let dupes = phones(&[
            "0721000001", "+40 721 000 001", "0721.000.001",
            "0721000002", "0721000003", "0721000004", "0721000005",
        ]);
        // Seven entries but only five distinct numbers
        let v = check_directory("Servicii Funerare Pop", &dupes, None);
        assert!(!v.directory);
    }

    #[test]
    fn test_portal_name_fires_before_url_rules() {
        let v = check_directory(
            "Lista Pompe Funebre Online",
            &phones(&["0721000001"]),
            Some("https://portal.example/firme/lista"),
        );
        assert!(v.directory);
        assert!(v.reason.starts_with("name contains"));
    }

    #[test]
    fn test_listing_url_path() {
        let v = check_directory(
            "Anubis",
            &[],
            Some("https://anuarul.example/firme/anubis-timisoara"),
        );
        assert!(v.directory);
        assert!(v.reason.contains("/firme/"));
    }

    #[test]
    fn test_blocklisted_domain() {
        let v = check_directory(
            "Anubis",
            &[],
            Some("https://www.timisoreni.ro/anubis"),
        );
        assert!(v.directory);
        assert!(v.reason.contains("timisoreni.ro"));
    }

    #[test]
    fn test_real_company_passes() {
        let v = check_directory(
            "Casa Funerară Anubis",
            &phones(&["0723456789"]),
            Some("https://casa-anubis.example"),
        );
        assert!(!v.directory);
        assert_eq!(v.reason, "real company");
    }
}
