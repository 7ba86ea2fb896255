use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, info, warn};

use crate::address::{canonical_county, parse_address};
use crate::db::{Database, UpsertAction};
use crate::directory::check_directory;
use crate::fetch::Fetcher;
use crate::models::{
    Company, Contact, ContactKind, CoordQuality, Location, LocationKind, RawBusiness, Source,
};
use crate::normalize::{extract_cui, normalize_cui, normalize_phone, valid_email, PhoneKind};

// Romanian service keywords as they appear in listings and on websites,
// folded, mapped onto the fixed taxonomy. Exact matches are tried over the
// whole table before any partial containment match.
const SERVICE_MAPPING: &[(&str, &str)] = &[
    ("transport funerar", "transport"),
    ("transport decedat", "transport"),
    ("transport", "transport"),
    ("repatriere", "repatriation"),
    ("transport international", "repatriation"),
    ("incinerare", "cremation"),
    ("crematoriu", "cremation"),
    ("crematie", "cremation"),
    ("imbalsamare", "embalming"),
    ("tanatopraxie", "embalming"),
    ("priveghi", "wake_house"),
    ("capela", "wake_house"),
    ("sala de priveghi", "wake_house"),
    ("sicriu", "coffins"),
    ("sicrie", "coffins"),
    ("sicri", "coffins"),
    ("cosciug", "coffins"),
    ("coroana", "flowers"),
    ("coroane", "flowers"),
    ("aranjamente florale", "flowers"),
    ("flori", "flowers"),
    ("acte deces", "bureaucracy"),
    ("documente", "bureaucracy"),
    ("formalitati", "bureaucracy"),
    ("servicii complete", "bureaucracy"),
    ("pachet funerar", "bureaucracy"),
    ("inmormantare", "bureaucracy"),
    ("inhumare", "bureaucracy"),
    ("religios", "religious"),
    ("slujba", "religious"),
    ("preot", "religious"),
    ("cruce", "monuments"),
    ("cruci", "monuments"),
    ("monument", "monuments"),
    ("monumente", "monuments"),
];

const PLACEHOLDER_DOMAINS: &[&str] = &[
    "example.com", "domain.com", "email.com", "wixpress.com", "sentry.io",
];

#[derive(Debug, Default, Clone, Copy)]
pub struct ImportOptions {
    pub dry_run: bool,
    pub enrich: bool,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ImportStats {
    pub processed: usize,
    pub imported: usize,
    pub updated: usize,
    pub skipped_directory: usize,
    pub skipped_invalid: usize,
    pub failed: usize,
}

impl ImportStats {
    pub fn merge(&mut self, other: &ImportStats) {
        self.processed += other.processed;
        self.imported += other.imported;
        self.updated += other.updated;
        self.skipped_directory += other.skipped_directory;
        self.skipped_invalid += other.skipped_invalid;
        self.failed += other.failed;
    }
}

/// Import one per-county raw JSON file into the datastore. Directory hits
/// and invalid records are counted and skipped; a failing upsert is logged
/// and the batch continues.
pub fn import_file(db: &mut Database, path: &Path, opts: &ImportOptions) -> Result<ImportStats> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let records: Vec<RawBusiness> = serde_json::from_str(&text)
        .with_context(|| format!("parsing {}", path.display()))?;
    let fetcher = if opts.enrich { Some(Fetcher::new()?) } else { None };

    let mut stats = ImportStats::default();
    for raw in &records {
        stats.processed += 1;

        let phones: Vec<String> = raw.phone.iter().cloned().collect();
        let verdict = check_directory(&raw.name, &phones, raw.website.as_deref());
        if verdict.directory {
            info!("skipping '{}': {}", raw.name, verdict.reason);
            stats.skipped_directory += 1;
            continue;
        }

        let mut company = company_from_raw(raw);
        if let Some(fetcher) = &fetcher {
            enrich_company(fetcher, &mut company);
        }

        if let Err(err) = company.validate() {
            warn!("invalid record '{}': {:#}", raw.name, err);
            stats.skipped_invalid += 1;
            continue;
        }

        if opts.dry_run {
            println!(
                "would import: {} ({} contacts, {} services)",
                company.name,
                company.contacts.len(),
                company.services.len()
            );
            stats.imported += 1;
            continue;
        }

        match db.upsert_company(&company) {
            Ok(outcome) => match outcome.action {
                UpsertAction::Inserted => stats.imported += 1,
                UpsertAction::Updated => stats.updated += 1,
            },
            Err(err) => {
                warn!("upsert failed for '{}': {:#}", raw.name, err);
                stats.failed += 1;
            }
        }
    }
    Ok(stats)
}

/// Map one free-text keyword onto a service tag, exact match first.
pub fn map_service(keyword: &str) -> Option<&'static str> {
    let folded = crate::normalize::strip_diacritics(keyword).to_lowercase();
    let folded = folded.trim();
    if folded.is_empty() {
        return None;
    }
    for (key, tag) in SERVICE_MAPPING {
        if *key == folded {
            return Some(tag);
        }
    }
    for (key, tag) in SERVICE_MAPPING {
        if folded.contains(key) || key.contains(folded) {
            return Some(tag);
        }
    }
    None
}

pub fn map_services(keywords: &[&str]) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for keyword in keywords {
        if let Some(tag) = map_service(keyword) {
            if !tags.iter().any(|t| t == tag) {
                tags.push(tag.to_string());
            }
        }
    }
    tags
}

fn company_from_raw(raw: &RawBusiness) -> Company {
    let mut company = Company::new(&raw.name, Source::Maps);
    company.website = raw.website.clone();
    company.category = raw.category.clone();
    company.rating = raw.rating;
    company.review_count = raw.review_count;
    company.description = raw.description.clone();
    company.is_non_stop = raw.is_non_stop;
    company.fiscal_code = raw.fiscal_code.as_deref().and_then(normalize_cui);

    if let Some(phone) = &raw.phone {
        match normalize_phone(phone) {
            Ok((value, kind)) => company.contacts.push(Contact {
                kind: match kind {
                    PhoneKind::Mobile => ContactKind::PhoneMobile,
                    PhoneKind::Landline => ContactKind::PhoneLandline,
                },
                value,
                is_primary: true,
            }),
            Err(err) => debug!("dropping phone '{}' of '{}': {}", phone, raw.name, err),
        }
    }
    if let Some(email) = &raw.email {
        let email = email.trim().to_lowercase();
        if valid_email(&email) {
            company.contacts.push(Contact {
                kind: ContactKind::Email,
                value: email,
                is_primary: false,
            });
        }
    }

    let mut keywords: Vec<&str> = raw.services.iter().map(String::as_str).collect();
    if let Some(category) = &raw.category {
        keywords.push(category);
    }
    company.services = map_services(&keywords);

    if let Some(address) = &raw.address {
        let (parsed_city, parsed_county) = parse_address(address);
        let city = raw.city.clone().or(parsed_city);
        let county = raw
            .county
            .as_deref()
            .and_then(canonical_county)
            .map(str::to_string)
            .or(parsed_county);
        let has_coords = raw.latitude.is_some() && raw.longitude.is_some();
        let coord_quality = if has_coords {
            match raw.coord_quality {
                Some(CoordQuality::Exact) => CoordQuality::Exact,
                _ => CoordQuality::Approximate,
            }
        } else {
            CoordQuality::Nothing
        };
        company.locations.push(Location {
            kind: LocationKind::Headquarters,
            address: address.clone(),
            city,
            county,
            latitude: if has_coords { raw.latitude } else { None },
            longitude: if has_coords { raw.longitude } else { None },
            coord_quality,
        });
    }

    company
}

// Pull an email and a fiscal code off the company website when the record
// lacks them. Best effort; fetch failures only log.
fn enrich_company(fetcher: &Fetcher, company: &mut Company) {
    let has_email = company.contacts.iter().any(|c| c.kind == ContactKind::Email);
    let needs_cui = company.fiscal_code.is_none();
    if has_email && !needs_cui {
        return;
    }
    let Some(website) = company.website.clone() else {
        return;
    };
    let page = match fetcher.fetch(&website) {
        Ok(page) => page,
        Err(err) => {
            debug!("enrichment fetch of {} failed: {:#}", website, err);
            return;
        }
    };
    if !has_email {
        if let Some(email) = page.emails().into_iter().find(|e| !placeholder_email(e)) {
            company.contacts.push(Contact {
                kind: ContactKind::Email,
                value: email,
                is_primary: false,
            });
        }
    }
    if needs_cui {
        if let Some(cui) = extract_cui(&page.text) {
            company.fiscal_code = Some(cui);
        }
    }
}

fn placeholder_email(email: &str) -> bool {
    let Some(domain) = email.rsplit('@').next() else {
        return true;
    };
    PLACEHOLDER_DOMAINS.iter().any(|p| {
        domain == *p || (domain.ends_with(p) && domain[..domain.len() - p.len()].ends_with('.'))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const FIXTURE: &str = r#"[
      {
        "name": "Casa Funerară Anubis",
        "address": "Calea Lugojului 45, Timișoara",
        "city": "Timișoara",
        "county": "Timiș",
        "phone": "+40 723 456 789",
        "category": "Servicii de pompe funebre",
        "services": ["sicrie", "transport funerar"],
        "is_non_stop": true,
        "rating": 4.8,
        "review_count": 12
      },
      {
        "name": "Lista Pompe Funebre Online",
        "website": "https://lista-funerare.ro/firme/",
        "phone": "0256100200"
      },
      {
        "name": "",
        "city": "Arad"
      }
    ]"#;

    fn write_fixture(tag: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "funerar_import_{}_{}.json",
            tag,
            std::process::id()
        ));
        fs::write(&path, FIXTURE).expect("write fixture");
        path
    }

    fn test_db() -> Database {
        let db = Database::open_at(Path::new(":memory:")).expect("open db");
        db.init().expect("init");
        db
    }

    #[test]
    fn test_map_service_exact_before_partial() {
        assert_eq!(map_service("transport funerar"), Some("transport"));
        assert_eq!(map_service("transport international"), Some("repatriation"));
        assert_eq!(map_service("Înmormântare"), Some("bureaucracy"));
        assert_eq!(map_service("sicrie de lux"), Some("coffins"));
        assert_eq!(map_service("catering"), None);
        assert_eq!(map_service(""), None);
    }

    #[test]
    fn test_map_services_dedups_tags() {
        assert_eq!(map_services(&["sicriu", "cosciug"]), vec!["coffins".to_string()]);
        assert_eq!(
            map_services(&["coroane", "priveghi", "flori"]),
            vec!["flowers".to_string(), "wake_house".to_string()]
        );
    }

    #[test]
    fn test_company_from_raw() {
        let records: Vec<RawBusiness> = serde_json::from_str(FIXTURE).expect("fixture");
        let company = company_from_raw(&records[0]);

        assert_eq!(company.name, "Casa Funerară Anubis");
        assert_eq!(company.slug, "casa-funerara-anubis");
        assert!(company.is_non_stop);
        assert_eq!(company.rating, Some(4.8));
        assert_eq!(company.contacts.len(), 1);
        assert_eq!(company.contacts[0].kind, ContactKind::PhoneMobile);
        assert_eq!(company.contacts[0].value, "0723456789");
        assert_eq!(company.services, vec!["coffins".to_string(), "transport".to_string()]);
        assert_eq!(company.locations.len(), 1);
        assert_eq!(company.locations[0].county.as_deref(), Some("Timiș"));
        assert_eq!(company.locations[0].coord_quality, CoordQuality::Nothing);
        assert!(company.validate().is_ok());
    }

    #[test]
    fn test_company_from_raw_drops_unparseable_phone() {
        let raw: RawBusiness = serde_json::from_str(
            r#"{"name": "Anubis", "phone": "nonstop la telefon"}"#,
        )
        .expect("record");
        let company = company_from_raw(&raw);
        assert!(company.contacts.is_empty());
        assert!(company.validate().is_ok());
    }

    #[test]
    fn test_import_file_counts_every_bucket() {
        let path = write_fixture("buckets");
        let mut db = test_db();

        let stats = import_file(&mut db, &path, &ImportOptions::default()).expect("import");
        assert_eq!(stats.processed, 3);
        assert_eq!(stats.imported, 1);
        assert_eq!(stats.updated, 0);
        assert_eq!(stats.skipped_directory, 1);
        assert_eq!(stats.skipped_invalid, 1);
        assert_eq!(stats.failed, 0);
        assert_eq!(db.stats().expect("stats").companies, 1);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_reimport_updates_instead_of_duplicating() {
        let path = write_fixture("reimport");
        let mut db = test_db();

        import_file(&mut db, &path, &ImportOptions::default()).expect("first import");
        let stats = import_file(&mut db, &path, &ImportOptions::default()).expect("second import");
        assert_eq!(stats.imported, 0);
        assert_eq!(stats.updated, 1);
        assert_eq!(db.stats().expect("stats").companies, 1);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let path = write_fixture("dry_run");
        let mut db = test_db();

        let opts = ImportOptions { dry_run: true, enrich: false };
        let stats = import_file(&mut db, &path, &opts).expect("dry run");
        assert_eq!(stats.imported, 1);
        assert_eq!(db.stats().expect("stats").companies, 0);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_placeholder_email_domains() {
        assert!(placeholder_email("user@example.com"));
        assert!(placeholder_email("noreply@shoutout.wixpress.com"));
        assert!(!placeholder_email("contact@casa-anubis.ro"));
        assert!(!placeholder_email("office@notwixpress.com"));
    }
}
