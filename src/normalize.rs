use anyhow::{anyhow, Result};
use regex::Regex;

// --- Diacritics ---

/// Fold the Romanian diacritic letters to their ASCII base letters.
/// Covers both the comma-below forms and the legacy cedilla forms.
pub fn strip_diacritics(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            'ă' | 'â' => 'a',
            'î' => 'i',
            'ș' | 'ş' => 's',
            'ț' | 'ţ' => 't',
            'Ă' | 'Â' => 'A',
            'Î' => 'I',
            'Ș' | 'Ş' => 'S',
            'Ț' | 'Ţ' => 'T',
            other => other,
        })
        .collect()
}

// --- Phone numbers ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhoneKind {
    Mobile,
    Landline,
}

impl PhoneKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhoneKind::Mobile => "mobile",
            PhoneKind::Landline => "landline",
        }
    }
}

/// Normalize a Romanian phone number to local format with a leading zero.
///
/// Strips everything but digits, drops the 40 country code (with or without
/// the international 00), classifies mobile vs landline by the 7xx prefix,
/// and re-prepends the trunk zero. Numbers that do not end up 9-10 digits
/// long are rejected.
pub fn normalize_phone(raw: &str) -> Result<(String, PhoneKind)> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

    let rest = if let Some(r) = digits.strip_prefix("0040") {
        r
    } else if digits.starts_with("40") && digits.len() > 10 {
        &digits[2..]
    } else if let Some(r) = digits.strip_prefix('0') {
        r
    } else {
        digits.as_str()
    };

    let kind = if rest.starts_with('7') {
        PhoneKind::Mobile
    } else {
        PhoneKind::Landline
    };

    let normalized = format!("0{}", rest);
    if normalized.len() < 9 || normalized.len() > 10 {
        return Err(anyhow!(
            "Invalid phone number '{}': {} digits after normalization",
            raw,
            normalized.len()
        ));
    }

    Ok((normalized, kind))
}

/// Keep only the digits of a phone string.
pub fn phone_digits(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Last nine digits of a phone number - the part that is stable across
/// "+40 7xx", "007xx" and "07xx" formattings. Used for duplicate lookups.
pub fn phone_tail(raw: &str) -> String {
    let digits = phone_digits(raw);
    if digits.len() > 9 {
        digits[digits.len() - 9..].to_string()
    } else {
        digits
    }
}

// --- Slugs ---

/// Lowercased, diacritic-folded, hyphen-separated form of a name.
/// Punctuation is dropped, runs of whitespace and hyphens collapse to a
/// single hyphen, and the result never starts or ends with one. Idempotent.
pub fn slugify(name: &str) -> String {
    let lowered = strip_diacritics(name).to_lowercase();

    let mut slug = String::with_capacity(lowered.len());
    let mut pending_hyphen = false;
    for c in lowered.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_hyphen {
                slug.push('-');
                pending_hyphen = false;
            }
            slug.push(c);
        } else if (c.is_whitespace() || c == '-') && !slug.is_empty() {
            pending_hyphen = true;
        }
        // other punctuation is dropped without leaving a separator
    }
    slug
}

// --- Fiscal codes ---

/// Strip an RO VAT prefix and validate the CUI shape (2-10 digits).
/// Returns the bare digits, or None when the input is not a plausible CUI.
pub fn normalize_cui(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let digits = trimmed
        .strip_prefix("RO")
        .or_else(|| trimmed.strip_prefix("ro"))
        .unwrap_or(trimmed)
        .trim();

    if digits.len() >= 2 && digits.len() <= 10 && digits.chars().all(|c| c.is_ascii_digit()) {
        Some(digits.to_string())
    } else {
        None
    }
}

pub fn valid_cui(raw: &str) -> bool {
    normalize_cui(raw).is_some()
}

/// Scan free text (footers, contact and imprint pages) for a fiscal code.
///
/// Recognizes labelled forms ("CUI: 12345678", "Cod fiscal RO123456"), the
/// bare VAT form ("RO12345678"), and digits sitting next to a trade-register
/// number ("J35/1234/2010 ... 12345678"). Returns digits only.
pub fn extract_cui(text: &str) -> Option<String> {
    let labelled =
        Regex::new(r"(?i)\b(?:cui|cif|cod\s+fiscal)\s*:?\s*(?:ro)?\s*(\d{2,10})\b").ok()?;
    if let Some(cap) = labelled.captures(text) {
        if let Some(cui) = normalize_cui(&cap[1]) {
            return Some(cui);
        }
    }

    // VAT form is uppercase in practice; case-sensitive keeps "euro" etc. out
    let vat = Regex::new(r"\bRO\s?(\d{6,10})\b").ok()?;
    if let Some(cap) = vat.captures(text) {
        if let Some(cui) = normalize_cui(&cap[1]) {
            return Some(cui);
        }
    }

    let registry = Regex::new(r"\bJ\s?\d{1,2}\s?/\s?\d{1,7}\s?/\s?\d{4}\b\D{0,30}(\d{6,10})\b").ok()?;
    if let Some(cap) = registry.captures(text) {
        if let Some(cui) = normalize_cui(&cap[1]) {
            return Some(cui);
        }
    }

    None
}

// --- Email ---

pub fn valid_email(s: &str) -> bool {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
        .map(|re| re.is_match(s))
        .unwrap_or(false)
}
