use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};

use crate::models::{Company, Contact, ContactKind, CoordQuality, Location, LocationKind, Source};
use crate::normalize::phone_tail;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertAction {
    Inserted,
    Updated,
}

#[derive(Debug, Clone, Copy)]
pub struct UpsertOutcome {
    pub company_id: i64,
    pub action: UpsertAction,
}

#[derive(Debug, Default)]
pub struct DbStats {
    pub companies: i64,
    pub verified: i64,
    pub contacts: i64,
    pub locations: i64,
    pub geocoded: i64,
    pub by_county: Vec<(String, i64)>,
    pub by_source: Vec<(String, i64)>,
}

pub struct Database {
    conn: Connection,
    path: PathBuf,
}

impl Database {
    pub fn open() -> Result<Self> {
        Self::open_at(&Self::default_path()?)
    }

    pub fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self { conn, path: path.to_path_buf() })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn default_path() -> Result<PathBuf> {
        // Use XDG data directory or fallback
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "funerar") {
            Ok(proj_dirs.data_dir().join("funerar.db"))
        } else {
            // Fallback to current directory
            Ok(PathBuf::from("funerar.db"))
        }
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS companies (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                slug TEXT NOT NULL UNIQUE,
                motto TEXT,
                description TEXT,
                fiscal_code TEXT UNIQUE,
                website TEXT,
                facebook_url TEXT,
                instagram_url TEXT,
                founded_year INTEGER,
                category TEXT,
                rating REAL,
                review_count INTEGER,
                is_non_stop INTEGER NOT NULL DEFAULT 0,
                verified INTEGER NOT NULL DEFAULT 0,
                source TEXT NOT NULL DEFAULT 'maps' CHECK (source IN ('maps', 'llm')),
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS contacts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                company_id INTEGER NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
                kind TEXT NOT NULL CHECK (kind IN ('phone_mobile', 'phone_landline', 'email', 'fax')),
                value TEXT NOT NULL,
                is_primary INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS locations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                company_id INTEGER NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
                kind TEXT NOT NULL DEFAULT 'headquarters' CHECK (kind IN ('headquarters', 'wake_house', 'showroom')),
                address TEXT NOT NULL,
                city TEXT,
                county TEXT,
                latitude REAL,
                longitude REAL,
                coord_quality TEXT NOT NULL DEFAULT 'none' CHECK (coord_quality IN ('exact', 'approximate', 'none'))
            );

            CREATE TABLE IF NOT EXISTS company_services (
                company_id INTEGER NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
                service TEXT NOT NULL CHECK (service IN (
                    'transport', 'repatriation', 'cremation', 'embalming', 'wake_house',
                    'coffins', 'flowers', 'bureaucracy', 'religious', 'monuments'
                )),
                PRIMARY KEY (company_id, service)
            );

            CREATE INDEX IF NOT EXISTS idx_contacts_company ON contacts(company_id);
            CREATE INDEX IF NOT EXISTS idx_locations_company ON locations(company_id);
            CREATE INDEX IF NOT EXISTS idx_locations_county ON locations(county);
            CREATE INDEX IF NOT EXISTS idx_companies_fiscal ON companies(fiscal_code);
            "#,
        )?;
        Ok(())
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        let tables: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='companies'",
            [],
            |row| row.get(0),
        )?;
        if tables == 0 {
            return Err(anyhow!(
                "Database not initialized. Run 'funerar db init' first."
            ));
        }
        Ok(())
    }

    // --- Company operations ---

    /// Insert or update one company with its children, atomically. Dedup
    /// lookup order: exact fiscal code, exact website, any phone whose last
    /// nine digits match a stored phone contact. On a hit the incoming
    /// record is merged into the stored one and the children are replaced.
    pub fn upsert_company(&mut self, company: &Company) -> Result<UpsertOutcome> {
        company.validate()?;
        let tx = self.conn.transaction()?;
        let outcome = match Self::find_existing(&tx, company)? {
            Some(id) => {
                let mut stored = Self::load_company(&tx, id)?;
                stored.absorb(company.clone());
                Self::update_company(&tx, id, &stored)?;
                Self::delete_children(&tx, id)?;
                Self::insert_children(&tx, id, &stored)?;
                UpsertOutcome { company_id: id, action: UpsertAction::Updated }
            }
            None => {
                let id = Self::insert_company(&tx, company)?;
                UpsertOutcome { company_id: id, action: UpsertAction::Inserted }
            }
        };
        tx.commit()?;
        Ok(outcome)
    }

    pub fn get_company(&self, id: i64) -> Result<Option<Company>> {
        match Self::load_company(&self.conn, id) {
            Ok(company) => Ok(Some(company)),
            Err(err) => match err.downcast_ref::<rusqlite::Error>() {
                Some(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                _ => Err(err),
            },
        }
    }

    pub fn list_companies(&self) -> Result<Vec<Company>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, slug, motto, description, fiscal_code, website,
                    facebook_url, instagram_url, founded_year, category, rating,
                    review_count, is_non_stop, verified, source
             FROM companies ORDER BY name",
        )?;
        let companies = stmt
            .query_map([], Self::row_to_company)?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list companies")?;

        let mut out = Vec::with_capacity(companies.len());
        for mut company in companies {
            if let Some(id) = company.id {
                company.contacts = Self::load_contacts(&self.conn, id)?;
                company.locations = Self::load_locations(&self.conn, id)?;
                company.services = Self::load_services(&self.conn, id)?;
            }
            out.push(company);
        }
        Ok(out)
    }

    pub fn set_verified(&self, id: i64, verified: bool) -> Result<()> {
        self.conn.execute(
            "UPDATE companies SET verified = ?1, updated_at = datetime('now') WHERE id = ?2",
            params![verified, id],
        )?;
        Ok(())
    }

    pub fn stats(&self) -> Result<DbStats> {
        let mut stats = DbStats {
            companies: self.count("SELECT COUNT(*) FROM companies")?,
            verified: self.count("SELECT COUNT(*) FROM companies WHERE verified = 1")?,
            contacts: self.count("SELECT COUNT(*) FROM contacts")?,
            locations: self.count("SELECT COUNT(*) FROM locations")?,
            geocoded: self.count(
                "SELECT COUNT(*) FROM locations WHERE latitude IS NOT NULL",
            )?,
            ..DbStats::default()
        };

        let mut stmt = self.conn.prepare(
            "SELECT county, COUNT(DISTINCT company_id) AS n FROM locations
             WHERE county IS NOT NULL GROUP BY county ORDER BY n DESC",
        )?;
        stats.by_county = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = self.conn.prepare(
            "SELECT source, COUNT(*) FROM companies GROUP BY source ORDER BY source",
        )?;
        stats.by_source = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(stats)
    }

    fn count(&self, sql: &str) -> Result<i64> {
        Ok(self.conn.query_row(sql, [], |row| row.get(0))?)
    }

    // --- Dedup lookup ---

    fn find_existing(conn: &Connection, company: &Company) -> Result<Option<i64>> {
        if let Some(fiscal) = &company.fiscal_code {
            let found = Self::query_id(
                conn,
                "SELECT id FROM companies WHERE fiscal_code = ?1",
                fiscal,
            )?;
            if found.is_some() {
                return Ok(found);
            }
        }

        if let Some(website) = &company.website {
            let found = Self::query_id(
                conn,
                "SELECT id FROM companies WHERE website IS NOT NULL AND LOWER(website) = LOWER(?1)",
                website,
            )?;
            if found.is_some() {
                return Ok(found);
            }
        }

        let incoming: Vec<String> = company.phone_values().map(phone_tail).collect();
        if incoming.is_empty() {
            return Ok(None);
        }
        let mut stmt = conn.prepare(
            "SELECT company_id, value FROM contacts
             WHERE kind IN ('phone_mobile', 'phone_landline', 'fax')",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (company_id, value) = row?;
            let tail = phone_tail(&value);
            if !tail.is_empty() && incoming.iter().any(|t| *t == tail) {
                return Ok(Some(company_id));
            }
        }
        Ok(None)
    }

    fn query_id(conn: &Connection, sql: &str, param: &str) -> Result<Option<i64>> {
        match conn.query_row(sql, [param], |row| row.get(0)) {
            Ok(id) => Ok(Some(id)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    // --- Writes ---

    fn insert_company(conn: &Connection, company: &Company) -> Result<i64> {
        let slug = Self::unique_slug(conn, &company.slug)?;
        conn.execute(
            "INSERT INTO companies (name, slug, motto, description, fiscal_code, website,
                                    facebook_url, instagram_url, founded_year, category,
                                    rating, review_count, is_non_stop, verified, source)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                company.name,
                slug,
                company.motto,
                company.description,
                company.fiscal_code,
                company.website,
                company.facebook_url,
                company.instagram_url,
                company.founded_year,
                company.category,
                company.rating,
                company.review_count,
                company.is_non_stop,
                company.verified,
                company.source.as_str(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        Self::insert_children(conn, id, company)?;
        Ok(id)
    }

    fn update_company(conn: &Connection, id: i64, company: &Company) -> Result<()> {
        // Slug and source keep their stored values
        conn.execute(
            "UPDATE companies SET name = ?1, motto = ?2, description = ?3, fiscal_code = ?4,
                    website = ?5, facebook_url = ?6, instagram_url = ?7, founded_year = ?8,
                    category = ?9, rating = ?10, review_count = ?11, is_non_stop = ?12,
                    verified = ?13, updated_at = datetime('now')
             WHERE id = ?14",
            params![
                company.name,
                company.motto,
                company.description,
                company.fiscal_code,
                company.website,
                company.facebook_url,
                company.instagram_url,
                company.founded_year,
                company.category,
                company.rating,
                company.review_count,
                company.is_non_stop,
                company.verified,
                id,
            ],
        )?;
        Ok(())
    }

    fn delete_children(conn: &Connection, id: i64) -> Result<()> {
        conn.execute("DELETE FROM contacts WHERE company_id = ?1", [id])?;
        conn.execute("DELETE FROM locations WHERE company_id = ?1", [id])?;
        conn.execute("DELETE FROM company_services WHERE company_id = ?1", [id])?;
        Ok(())
    }

    fn insert_children(conn: &Connection, id: i64, company: &Company) -> Result<()> {
        for contact in &company.contacts {
            conn.execute(
                "INSERT INTO contacts (company_id, kind, value, is_primary)
                 VALUES (?1, ?2, ?3, ?4)",
                params![id, contact.kind.as_str(), contact.value, contact.is_primary],
            )?;
        }
        for location in &company.locations {
            conn.execute(
                "INSERT INTO locations (company_id, kind, address, city, county,
                                        latitude, longitude, coord_quality)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    id,
                    location.kind.as_str(),
                    location.address,
                    location.city,
                    location.county,
                    location.latitude,
                    location.longitude,
                    location.coord_quality.as_str(),
                ],
            )?;
        }
        for service in &company.services {
            conn.execute(
                "INSERT OR IGNORE INTO company_services (company_id, service) VALUES (?1, ?2)",
                params![id, service],
            )?;
        }
        Ok(())
    }

    fn unique_slug(conn: &Connection, base: &str) -> Result<String> {
        let base = if base.is_empty() { "company" } else { base };
        let mut slug = base.to_string();
        let mut n = 2;
        loop {
            let taken: i64 = conn.query_row(
                "SELECT COUNT(*) FROM companies WHERE slug = ?1",
                [&slug],
                |row| row.get(0),
            )?;
            if taken == 0 {
                return Ok(slug);
            }
            slug = format!("{base}-{n}");
            n += 1;
        }
    }

    // --- Loading ---

    fn load_company(conn: &Connection, id: i64) -> Result<Company> {
        let mut company = conn.query_row(
            "SELECT id, name, slug, motto, description, fiscal_code, website,
                    facebook_url, instagram_url, founded_year, category, rating,
                    review_count, is_non_stop, verified, source
             FROM companies WHERE id = ?1",
            [id],
            Self::row_to_company,
        )?;
        company.contacts = Self::load_contacts(conn, id)?;
        company.locations = Self::load_locations(conn, id)?;
        company.services = Self::load_services(conn, id)?;
        Ok(company)
    }

    fn load_contacts(conn: &Connection, id: i64) -> Result<Vec<Contact>> {
        let mut stmt = conn.prepare(
            "SELECT kind, value, is_primary FROM contacts
             WHERE company_id = ?1 ORDER BY is_primary DESC, id",
        )?;
        let rows = stmt.query_map([id], |row| {
            let kind: String = row.get(0)?;
            Ok(Contact {
                kind: ContactKind::parse(&kind).unwrap_or(ContactKind::PhoneLandline),
                value: row.get(1)?,
                is_primary: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn load_locations(conn: &Connection, id: i64) -> Result<Vec<Location>> {
        let mut stmt = conn.prepare(
            "SELECT kind, address, city, county, latitude, longitude, coord_quality
             FROM locations WHERE company_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map([id], |row| {
            let kind: String = row.get(0)?;
            let quality: String = row.get(6)?;
            Ok(Location {
                kind: LocationKind::parse(&kind).unwrap_or(LocationKind::Headquarters),
                address: row.get(1)?,
                city: row.get(2)?,
                county: row.get(3)?,
                latitude: row.get(4)?,
                longitude: row.get(5)?,
                coord_quality: CoordQuality::parse(&quality).unwrap_or(CoordQuality::Nothing),
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn load_services(conn: &Connection, id: i64) -> Result<Vec<String>> {
        let mut stmt = conn.prepare(
            "SELECT service FROM company_services WHERE company_id = ?1 ORDER BY service",
        )?;
        let rows = stmt.query_map([id], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn row_to_company(row: &rusqlite::Row) -> rusqlite::Result<Company> {
        let source: String = row.get(15)?;
        Ok(Company {
            id: Some(row.get(0)?),
            name: row.get(1)?,
            slug: row.get(2)?,
            motto: row.get(3)?,
            description: row.get(4)?,
            fiscal_code: row.get(5)?,
            website: row.get(6)?,
            facebook_url: row.get(7)?,
            instagram_url: row.get(8)?,
            founded_year: row.get(9)?,
            category: row.get(10)?,
            rating: row.get(11)?,
            review_count: row.get(12)?,
            is_non_stop: row.get(13)?,
            verified: row.get(14)?,
            source: Source::parse(&source).unwrap_or(Source::Maps),
            services: Vec::new(),
            contacts: Vec::new(),
            locations: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn test_db() -> Database {
        let db = Database::open_at(Path::new(":memory:")).expect("open in-memory db");
        db.init().expect("init schema");
        db
    }

    fn sample_company(name: &str) -> Company {
        let mut c = Company::new(name, Source::Maps);
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
            latitude: None,
            longitude: None,
            coord_quality: CoordQuality::Nothing,
        }];
        c.services = vec!["transport".to_string()];
        c
    }

    #[test]
    fn test_upsert_twice_same_fiscal_updates_in_place() {
        let mut db = test_db();

        let mut first = sample_company("Casa Funerară Anubis");
        first.fiscal_code = Some("12345678".to_string());
        let outcome = db.upsert_company(&first).expect("insert");
        assert_eq!(outcome.action, UpsertAction::Inserted);

        let mut second = sample_company("SC Casa Funerara Anubis SRL");
        second.fiscal_code = Some("12345678".to_string());
        second.website = Some("https://anubis.example".to_string());
        second.contacts.clear();
        let outcome2 = db.upsert_company(&second).expect("update");
        assert_eq!(outcome2.action, UpsertAction::Updated);
        assert_eq!(outcome2.company_id, outcome.company_id);

        assert_eq!(db.stats().expect("stats").companies, 1);
        let stored = db
            .get_company(outcome.company_id)
            .expect("get")
            .expect("present");
        assert_eq!(stored.name, "SC Casa Funerara Anubis SRL");
        assert_eq!(stored.website.as_deref(), Some("https://anubis.example"));
        // Slug stays from the first insert
        assert_eq!(stored.slug, "casa-funerara-anubis");
    }

    #[test]
    fn test_upsert_matches_by_website() {
        let mut db = test_db();

        let mut first = sample_company("Anubis");
        first.website = Some("https://Anubis.example".to_string());
        first.contacts.clear();
        db.upsert_company(&first).expect("insert");

        let mut second = sample_company("Anubis Servicii");
        second.website = Some("https://anubis.example".to_string());
        second.contacts.clear();
        let outcome = db.upsert_company(&second).expect("update");
        assert_eq!(outcome.action, UpsertAction::Updated);
        assert_eq!(db.stats().expect("stats").companies, 1);
    }

    #[test]
    fn test_upsert_matches_by_phone_tail() {
        let mut db = test_db();

        db.upsert_company(&sample_company("Anubis")).expect("insert");

        // Same subscriber number stored with the 40 prefix
        let mut second = sample_company("Pompe Funebre Anubis");
        second.contacts[0].value = "40723456789".to_string();
        let outcome = db.upsert_company(&second).expect("update");
        assert_eq!(outcome.action, UpsertAction::Updated);
        assert_eq!(db.stats().expect("stats").companies, 1);
    }

    #[test]
    fn test_distinct_companies_get_suffixed_slugs() {
        let mut db = test_db();

        let mut first = sample_company("Casa Anubis");
        first.fiscal_code = Some("11111111".to_string());
        db.upsert_company(&first).expect("insert");

        let mut second = sample_company("Casa Anubis");
        second.fiscal_code = Some("22222222".to_string());
        second.contacts[0].value = "0745000000".to_string();
        let outcome = db.upsert_company(&second).expect("insert second");
        assert_eq!(outcome.action, UpsertAction::Inserted);

        let stored = db
            .get_company(outcome.company_id)
            .expect("get")
            .expect("present");
        assert_eq!(stored.slug, "casa-anubis-2");
    }

    #[test]
    fn test_children_are_replaced_on_update() {
        let mut db = test_db();

        let mut first = sample_company("Anubis");
        first.fiscal_code = Some("12345678".to_string());
        first.services = vec!["transport".to_string(), "coffins".to_string()];
        let id = db.upsert_company(&first).expect("insert").company_id;

        let mut second = sample_company("Anubis");
        second.fiscal_code = Some("12345678".to_string());
        second.services = vec!["flowers".to_string()];
        second.contacts = vec![
            Contact {
                kind: ContactKind::PhoneLandline,
                value: "0256123456".to_string(),
                is_primary: true,
            },
        ];
        db.upsert_company(&second).expect("update");

        let stored = db.get_company(id).expect("get").expect("present");
        assert_eq!(stored.services, vec!["flowers".to_string()]);
        assert_eq!(stored.contacts.len(), 1);
        assert_eq!(stored.contacts[0].value, "0256123456");
        assert_eq!(stored.locations.len(), 1);
    }

    #[test]
    fn test_verified_flag_survives_reimport() {
        let mut db = test_db();

        let mut first = sample_company("Anubis");
        first.fiscal_code = Some("12345678".to_string());
        let id = db.upsert_company(&first).expect("insert").company_id;
        db.set_verified(id, true).expect("set verified");

        let mut second = sample_company("Anubis");
        second.fiscal_code = Some("12345678".to_string());
        db.upsert_company(&second).expect("update");

        let stored = db.get_company(id).expect("get").expect("present");
        assert!(stored.verified);
    }

    #[test]
    fn test_upsert_rejects_invalid_company() {
        let mut db = test_db();
        let mut bad = sample_company("Anubis");
        bad.services = vec!["catering".to_string()];
        assert!(db.upsert_company(&bad).is_err());
        assert_eq!(db.stats().expect("stats").companies, 0);
    }

    #[test]
    fn test_stats_by_county() {
        let mut db = test_db();
        let mut c = sample_company("Anubis");
        c.fiscal_code = Some("12345678".to_string());
        db.upsert_company(&c).expect("insert");

        let stats = db.stats().expect("stats");
        assert_eq!(stats.companies, 1);
        assert_eq!(stats.contacts, 1);
        assert_eq!(stats.locations, 1);
        assert_eq!(stats.geocoded, 0);
        assert_eq!(stats.by_county, vec![("Timiș".to_string(), 1)]);
    }
}
