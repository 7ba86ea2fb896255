use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::normalize::{slugify, valid_cui, valid_email};

/// The fixed service taxonomy. Import and extraction map free-text keywords
/// onto these tags; anything else is a validation error, not a silent drop.
pub const SERVICE_TAGS: &[&str] = &[
    "transport",
    "repatriation",
    "cremation",
    "embalming",
    "wake_house",
    "coffins",
    "flowers",
    "bureaucracy",
    "religious",
    "monuments",
];

pub fn valid_service_tag(tag: &str) -> bool {
    SERVICE_TAGS.contains(&tag)
}

/// Where a company record first came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Maps,
    Llm,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Maps => "maps",
            Source::Llm => "llm",
        }
    }

    pub fn parse(s: &str) -> Option<Source> {
        match s {
            "maps" => Some(Source::Maps),
            "llm" => Some(Source::Llm),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactKind {
    PhoneMobile,
    PhoneLandline,
    Email,
    Fax,
}

impl ContactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContactKind::PhoneMobile => "phone_mobile",
            ContactKind::PhoneLandline => "phone_landline",
            ContactKind::Email => "email",
            ContactKind::Fax => "fax",
        }
    }

    pub fn parse(s: &str) -> Option<ContactKind> {
        match s {
            "phone_mobile" => Some(ContactKind::PhoneMobile),
            "phone_landline" => Some(ContactKind::PhoneLandline),
            "email" => Some(ContactKind::Email),
            "fax" => Some(ContactKind::Fax),
            _ => None,
        }
    }

    pub fn is_phone(&self) -> bool {
        matches!(self, ContactKind::PhoneMobile | ContactKind::PhoneLandline | ContactKind::Fax)
    }
}

/// One way of reaching a company. Phone and fax values are stored as
/// normalized local digits, emails in validated form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub kind: ContactKind,
    pub value: String,
    pub is_primary: bool,
}

impl Contact {
    pub fn validate(&self) -> Result<()> {
        if self.value.is_empty() {
            bail!("empty contact value");
        }
        if self.kind.is_phone() {
            if !self.value.chars().all(|c| c.is_ascii_digit()) {
                bail!("phone contact '{}' is not normalized digits", self.value);
            }
        } else if !valid_email(&self.value) {
            bail!("invalid email address '{}'", self.value);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationKind {
    Headquarters,
    WakeHouse,
    Showroom,
}

impl LocationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocationKind::Headquarters => "headquarters",
            LocationKind::WakeHouse => "wake_house",
            LocationKind::Showroom => "showroom",
        }
    }

    pub fn parse(s: &str) -> Option<LocationKind> {
        match s {
            "headquarters" => Some(LocationKind::Headquarters),
            "wake_house" => Some(LocationKind::WakeHouse),
            "showroom" => Some(LocationKind::Showroom),
            _ => None,
        }
    }
}

/// How trustworthy a coordinate pair is. `Exact` only when the geocoded
/// address carried a street number, `Approximate` for centroid and city-level
/// hits, `Nothing` when every strategy failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordQuality {
    #[serde(rename = "exact")]
    Exact,
    #[serde(rename = "approximate")]
    Approximate,
    #[serde(rename = "none")]
    Nothing,
}

impl CoordQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoordQuality::Exact => "exact",
            CoordQuality::Approximate => "approximate",
            CoordQuality::Nothing => "none",
        }
    }

    pub fn parse(s: &str) -> Option<CoordQuality> {
        match s {
            "exact" => Some(CoordQuality::Exact),
            "approximate" => Some(CoordQuality::Approximate),
            "none" => Some(CoordQuality::Nothing),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub kind: LocationKind,
    pub address: String,
    pub city: Option<String>,
    pub county: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub coord_quality: CoordQuality,
}

impl Location {
    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            bail!("location without an address");
        }
        if self.latitude.is_some() != self.longitude.is_some() {
            bail!("latitude and longitude must come as a pair");
        }
        let has_coords = self.latitude.is_some();
        if has_coords == matches!(self.coord_quality, CoordQuality::Nothing) {
            bail!(
                "coordinate quality '{}' contradicts the coordinates",
                self.coord_quality.as_str()
            );
        }
        Ok(())
    }
}

/// A funeral-services company as stored. Owns its contacts, locations and
/// service tags; on update those children are replaced wholesale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Company {
    pub id: Option<i64>,
    pub name: String,
    pub slug: String,
    pub motto: Option<String>,
    pub description: Option<String>,
    pub fiscal_code: Option<String>,
    pub website: Option<String>,
    pub facebook_url: Option<String>,
    pub instagram_url: Option<String>,
    pub founded_year: Option<i32>,
    pub category: Option<String>,
    pub rating: Option<f64>,
    pub review_count: Option<i64>,
    pub is_non_stop: bool,
    pub verified: bool,
    pub source: Source,
    pub services: Vec<String>,
    pub contacts: Vec<Contact>,
    pub locations: Vec<Location>,
}

impl Company {
    pub fn new(name: &str, source: Source) -> Company {
        Company {
            id: None,
            name: name.trim().to_string(),
            slug: slugify(name),
            motto: None,
            description: None,
            fiscal_code: None,
            website: None,
            facebook_url: None,
            instagram_url: None,
            founded_year: None,
            category: None,
            rating: None,
            review_count: None,
            is_non_stop: false,
            verified: false,
            source,
            services: Vec::new(),
            contacts: Vec::new(),
            locations: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            bail!("company name is empty");
        }
        if let Some(motto) = &self.motto {
            if motto.chars().count() > 200 {
                bail!("motto exceeds 200 characters");
            }
        }
        for tag in &self.services {
            if !valid_service_tag(tag) {
                bail!("unknown service tag '{}'", tag);
            }
        }
        if let Some(cui) = &self.fiscal_code {
            if !valid_cui(cui) {
                bail!("invalid fiscal code '{}'", cui);
            }
        }
        for contact in &self.contacts {
            contact.validate()?;
        }
        for location in &self.locations {
            location.validate()?;
        }
        Ok(())
    }

    /// Merge a fresh sighting into this stored record. Incoming `Some` scalars
    /// win, `None` leaves the stored value; flags only ever turn on; children
    /// are replaced wholesale. Slug, source and id stay as stored.
    pub fn absorb(&mut self, incoming: Company) {
        self.name = incoming.name;
        if incoming.motto.is_some() {
            self.motto = incoming.motto;
        }
        if incoming.description.is_some() {
            self.description = incoming.description;
        }
        if incoming.fiscal_code.is_some() {
            self.fiscal_code = incoming.fiscal_code;
        }
        if incoming.website.is_some() {
            self.website = incoming.website;
        }
        if incoming.facebook_url.is_some() {
            self.facebook_url = incoming.facebook_url;
        }
        if incoming.instagram_url.is_some() {
            self.instagram_url = incoming.instagram_url;
        }
        if incoming.founded_year.is_some() {
            self.founded_year = incoming.founded_year;
        }
        if incoming.category.is_some() {
            self.category = incoming.category;
        }
        if incoming.rating.is_some() {
            self.rating = incoming.rating;
        }
        if incoming.review_count.is_some() {
            self.review_count = incoming.review_count;
        }
        self.is_non_stop = self.is_non_stop || incoming.is_non_stop;
        self.verified = self.verified || incoming.verified;
        self.services = incoming.services;
        self.contacts = incoming.contacts;
        self.locations = incoming.locations;
    }

    pub fn phone_values(&self) -> impl Iterator<Item = &str> {
        self.contacts
            .iter()
            .filter(|c| c.kind.is_phone())
            .map(|c| c.value.as_str())
    }
}

/// One scraped Maps listing, as written to the per-county JSON files. This is
/// the typed boundary between scraping and import; the import step turns it
/// into a validated `Company`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawBusiness {
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub county: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub review_count: Option<i64>,
    #[serde(default)]
    pub business_hours: Option<String>,
    #[serde(default)]
    pub is_non_stop: bool,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub place_id: Option<String>,
    #[serde(default)]
    pub coord_quality: Option<CoordQuality>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub fiscal_code: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub services: Vec<String>,
}

/// One authorized provider from the DSP snapshot. Read-only input data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DspRecord {
    pub name: String,
    #[serde(default)]
    pub cui: Option<String>,
    pub county: String,
    #[serde(default)]
    pub county_code: Option<String>,
    #[serde(default)]
    pub authorization_number: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_company() -> Company {
        let mut c = Company::new("Casa Funerară Anubis", Source::Maps);
        c.fiscal_code = Some("12345678".to_string());
        c.services = vec!["transport".to_string(), "coffins".to_string()];
        c.contacts = vec![Contact {
            kind: ContactKind::PhoneMobile,
            value: "0723456789".to_string(),
            is_primary: true,
        }];
        c.locations = vec![Location {
            kind: LocationKind::Headquarters,
            address: "Calea Lugojului 45".to_string(),
            city: Some("Timișoara".to_string()),
            county: Some("Timiș".to_string()),
            latitude: Some(45.75),
            longitude: Some(21.22),
            coord_quality: CoordQuality::Exact,
        }];
        c
    }

    #[test]
    fn test_new_company_derives_slug() {
        let c = Company::new("Casa Funerară Anubis", Source::Maps);
        assert_eq!(c.slug, "casa-funerara-anubis");
        assert!(!c.verified);
    }

    #[test]
    fn test_validate_accepts_complete_company() {
        assert!(sample_company().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_service_tag() {
        let mut c = sample_company();
        c.services.push("catering".to_string());
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_long_motto() {
        let mut c = sample_company();
        c.motto = Some("x".repeat(201));
        assert!(c.validate().is_err());
        c.motto = Some("x".repeat(200));
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unpaired_coordinates() {
        let mut c = sample_company();
        c.locations[0].longitude = None;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_quality_without_coordinates() {
        let mut c = sample_company();
        c.locations[0].latitude = None;
        c.locations[0].longitude = None;
        assert!(c.validate().is_err());
        c.locations[0].coord_quality = CoordQuality::Nothing;
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_raw_phone_contact() {
        let mut c = sample_company();
        c.contacts[0].value = "+40 723 456 789".to_string();
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_absorb_some_wins_none_keeps() {
        let mut stored = sample_company();
        stored.id = Some(7);
        stored.motto = Some("Alături de familie".to_string());

        let mut incoming = Company::new("Casa Funerara Anubis SRL", Source::Llm);
        incoming.website = Some("https://anubis.ro".to_string());
        incoming.contacts = vec![Contact {
            kind: ContactKind::PhoneLandline,
            value: "0256123456".to_string(),
            is_primary: true,
        }];

        stored.absorb(incoming);

        assert_eq!(stored.id, Some(7));
        assert_eq!(stored.name, "Casa Funerara Anubis SRL");
        // Slug and source are assigned at first insert and never change
        assert_eq!(stored.slug, "casa-funerara-anubis");
        assert_eq!(stored.source, Source::Maps);
        // None did not erase the stored motto, Some overwrote the website
        assert_eq!(stored.motto.as_deref(), Some("Alături de familie"));
        assert_eq!(stored.website.as_deref(), Some("https://anubis.ro"));
        // Children replaced wholesale
        assert_eq!(stored.contacts.len(), 1);
        assert_eq!(stored.contacts[0].kind, ContactKind::PhoneLandline);
    }

    #[test]
    fn test_absorb_flags_only_turn_on() {
        let mut stored = sample_company();
        stored.verified = true;
        stored.is_non_stop = false;

        let mut incoming = Company::new("Anubis", Source::Maps);
        incoming.is_non_stop = true;
        stored.absorb(incoming);

        assert!(stored.verified);
        assert!(stored.is_non_stop);
    }

    #[test]
    fn test_raw_business_tolerates_sparse_json() {
        let raw: RawBusiness =
            serde_json::from_str(r#"{"name": "Pompe Funebre Lux", "city": "Arad"}"#)
                .expect("sparse record should deserialize");
        assert_eq!(raw.name, "Pompe Funebre Lux");
        assert_eq!(raw.city.as_deref(), Some("Arad"));
        assert_eq!(raw.phone, None);
        assert!(!raw.is_non_stop);
        assert!(raw.services.is_empty());
    }

    #[test]
    fn test_coord_quality_round_trips_as_none_string() {
        assert_eq!(CoordQuality::Nothing.as_str(), "none");
        assert_eq!(CoordQuality::parse("none"), Some(CoordQuality::Nothing));
        let json = serde_json::to_string(&CoordQuality::Nothing).expect("serialize");
        assert_eq!(json, "\"none\"");
    }
}
