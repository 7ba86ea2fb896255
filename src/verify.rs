use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::counties;
use crate::models::DspRecord;
use crate::normalize::{normalize_cui, strip_diacritics};

pub const DEFAULT_THRESHOLD: f64 = 0.85;

/// The DSP authorization snapshot as scraped, one JSON document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DspList {
    #[serde(default)]
    pub scraped_at: Option<String>,
    #[serde(default)]
    pub total_companies: Option<usize>,
    pub companies: Vec<DspRecord>,
}

impl DspList {
    pub fn load(path: &Path) -> Result<DspList> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading DSP list {}", path.display()))?;
        let list: DspList = serde_json::from_str(&text)
            .with_context(|| format!("parsing DSP list {}", path.display()))?;
        Ok(list)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMethod {
    CuiExact,
    NameMatch,
    NoMatch,
}

impl MatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchMethod::CuiExact => "cui_exact",
            MatchMethod::NameMatch => "name_match",
            MatchMethod::NoMatch => "none",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Verification {
    pub verified: bool,
    pub score: f64, // 0-100
    pub matched: Option<String>,
    pub closest: Option<String>,
    pub method: MatchMethod,
}

struct Candidate {
    record: DspRecord,
    folded_name: String,
    cui: Option<String>,
}

/// Matches company names against the DSP list. Names are normalized once at
/// construction; lookups are per-county when a county is given.
pub struct Verifier {
    threshold: f64,
    candidates: Vec<Candidate>,
}

impl Verifier {
    pub fn new(list: DspList, threshold: f64) -> Verifier {
        let candidates = list
            .companies
            .into_iter()
            .map(|record| Candidate {
                folded_name: normalize_company_name(&record.name),
                cui: record.cui.as_deref().and_then(normalize_cui),
                record,
            })
            .collect();
        Verifier { threshold, candidates }
    }

    /// Check one company against the list. A county narrows the candidate
    /// set with no cross-county fallback: when it excludes everything the
    /// score is 0. A matching CUI wins outright before any name comparison.
    pub fn verify(&self, name: &str, county: Option<&str>, cui: Option<&str>) -> Verification {
        let candidates: Vec<&Candidate> = match county {
            Some(county) => self
                .candidates
                .iter()
                .filter(|c| candidate_in_county(c, county))
                .collect(),
            None => self.candidates.iter().collect(),
        };

        if let Some(cui) = cui.and_then(normalize_cui) {
            for candidate in &candidates {
                if candidate.cui.as_deref() == Some(cui.as_str()) {
                    return Verification {
                        verified: true,
                        score: 100.0,
                        matched: Some(candidate.record.name.clone()),
                        closest: Some(candidate.record.name.clone()),
                        method: MatchMethod::CuiExact,
                    };
                }
            }
        }

        let query = normalize_company_name(name);
        let mut best: Option<(f64, &Candidate)> = None;
        for candidate in &candidates {
            let score = similarity(&query, &candidate.folded_name);
            if best.map_or(true, |(b, _)| score > b) {
                best = Some((score, candidate));
            }
        }

        match best {
            Some((score, candidate)) if score >= self.threshold => Verification {
                verified: true,
                score: score * 100.0,
                matched: Some(candidate.record.name.clone()),
                closest: Some(candidate.record.name.clone()),
                method: MatchMethod::NameMatch,
            },
            Some((score, candidate)) => Verification {
                verified: false,
                score: score * 100.0,
                matched: None,
                closest: Some(candidate.record.name.clone()),
                method: MatchMethod::NoMatch,
            },
            None => Verification {
                verified: false,
                score: 0.0,
                matched: None,
                closest: None,
                method: MatchMethod::NoMatch,
            },
        }
    }
}

fn candidate_in_county(candidate: &Candidate, county: &str) -> bool {
    if let Some(code) = &candidate.record.county_code {
        if code.eq_ignore_ascii_case(county.trim()) {
            return true;
        }
    }
    same_county(&candidate.record.county, county)
}

fn same_county(a: &str, b: &str) -> bool {
    match (counties::find(a), counties::find(b)) {
        (Some(x), Some(y)) => x.code == y.code,
        _ => strip_diacritics(a).to_lowercase().trim() == strip_diacritics(b).to_lowercase().trim(),
    }
}

/// Collapse a legal name to its comparable core: uppercase, diacritics
/// folded, leading `SC`/`S.C.` and trailing legal-form suffixes dropped,
/// punctuation removed, whitespace collapsed.
pub fn normalize_company_name(name: &str) -> String {
    let mut s = strip_diacritics(name).to_uppercase();
    if let Ok(re) = Regex::new(r"^S\.?C\.?\s+") {
        s = re.replace(&s, "").into_owned();
    }
    if let Ok(re) = Regex::new(r"\s+(?:S\.?R\.?L\.?|S\.?A\.?|I\.?I\.?|P\.?F\.?A\.?|S\.?N\.?C\.?)\s*$") {
        s = re.replace(&s, "").into_owned();
    }
    let s: String = s
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Similarity of two already-normalized names in [0, 1]. Identical strings
/// score 1.0, a containment scores the length ratio, anything else the
/// normalized edit distance.
pub fn similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    if a.contains(b) || b.contains(a) {
        let (la, lb) = (a.chars().count() as f64, b.chars().count() as f64);
        return la.min(lb) / la.max(lb);
    }
    strsim::normalized_levenshtein(a, b)
}
