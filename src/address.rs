use crate::normalize::strip_diacritics;

// County-name variants as they show up in freeform addresses, lowercased and
// diacritic-folded, mapped to the canonical county name. Scanned in order,
// first substring hit wins, so the multi-word variants come first.
const COUNTY_VARIANTS: &[(&str, &str)] = &[
    ("bistrita-nasaud", "Bistrița-Năsăud"),
    ("bistrita nasaud", "Bistrița-Năsăud"),
    ("caras-severin", "Caraș-Severin"),
    ("caras severin", "Caraș-Severin"),
    ("satu mare", "Satu Mare"),
    ("alba", "Alba"),
    ("arad", "Arad"),
    ("arges", "Argeș"),
    ("bacau", "Bacău"),
    ("bihor", "Bihor"),
    ("bistrita", "Bistrița-Năsăud"),
    ("botosani", "Botoșani"),
    ("braila", "Brăila"),
    ("brasov", "Brașov"),
    ("bucuresti", "București"),
    ("bucharest", "București"),
    ("buzau", "Buzău"),
    ("calarasi", "Călărași"),
    ("cluj", "Cluj"),
    ("constanta", "Constanța"),
    ("covasna", "Covasna"),
    ("dambovita", "Dâmbovița"),
    ("dolj", "Dolj"),
    ("galati", "Galați"),
    ("giurgiu", "Giurgiu"),
    ("gorj", "Gorj"),
    ("harghita", "Harghita"),
    ("hunedoara", "Hunedoara"),
    ("ialomita", "Ialomița"),
    ("iasi", "Iași"),
    ("ilfov", "Ilfov"),
    ("maramures", "Maramureș"),
    ("mehedinti", "Mehedinți"),
    ("mures", "Mureș"),
    ("neamt", "Neamț"),
    ("olt", "Olt"),
    ("prahova", "Prahova"),
    ("salaj", "Sălaj"),
    ("sibiu", "Sibiu"),
    ("suceava", "Suceava"),
    ("teleorman", "Teleorman"),
    ("timis", "Timiș"),
    ("tulcea", "Tulcea"),
    ("vaslui", "Vaslui"),
    ("valcea", "Vâlcea"),
    ("vrancea", "Vrancea"),
];

/// Romanian street-type prefixes, diacritic-folded. Shared between the
/// address parser (to reject street fragments as city candidates) and the
/// geocoder's street-only retry.
pub const STREET_PREFIXES: &[&str] = &[
    "strada", "str.", "str ", "calea", "bulevardul", "bd.", "bd ", "b-dul",
    "aleea", "piata", "splai", "splaiul", "drumul", "intrarea",
];

/// Find the canonical county named anywhere in the text. Substring matching
/// over the folded text, first variant wins; a bare "sector N" implies
/// București. Substring search will misfire on street names that embed a
/// county name, which is an accepted limitation of this parser.
pub fn county_from_text(text: &str) -> Option<String> {
    let folded = strip_diacritics(text).to_lowercase();
    for (variant, canonical) in COUNTY_VARIANTS {
        if folded.contains(variant) {
            return Some((*canonical).to_string());
        }
    }
    if folded.contains("sector ") {
        return Some("București".to_string());
    }
    None
}

/// Map a county-ish string ("timis", "TIMIȘ", "Bistrița-Năsăud") to its
/// canonical form by exact folded comparison. None when unrecognized.
pub fn canonical_county(name: &str) -> Option<&'static str> {
    let folded = strip_diacritics(name).to_lowercase();
    let folded = folded.trim();
    COUNTY_VARIANTS
        .iter()
        .find(|(variant, _)| *variant == folded)
        .map(|(_, canonical)| *canonical)
}

/// Best-effort extraction of (city, county) from a freeform Romanian address.
///
/// The county comes from a variant scan over the whole string. The city comes
/// from the comma-separated fragments, scanned from the end: postal codes,
/// fragments starting with a digit, street fragments, sector markers, county
/// names and "Romania" are skipped, and the first survivor of 3-30 characters
/// (minus any numeric tokens riding along) wins.
pub fn parse_address(address: &str) -> (Option<String>, Option<String>) {
    let county = county_from_text(address);

    let mut city = None;
    for fragment in address.split(',').rev() {
        let fragment = fragment.trim();
        if fragment.is_empty() {
            continue;
        }
        let folded = strip_diacritics(fragment).to_lowercase();

        if is_postal_code(&folded) {
            continue;
        }
        if folded.starts_with(|c: char| c.is_ascii_digit()) {
            continue;
        }
        if STREET_PREFIXES.iter().any(|p| folded.contains(p)) {
            continue;
        }
        if folded == "romania" || folded.starts_with("sector") {
            continue;
        }
        if COUNTY_VARIANTS.iter().any(|(variant, _)| *variant == folded) {
            continue;
        }

        // City fragments often carry the postal code next to the name
        let cleaned = strip_numeric_tokens(fragment);
        let len = cleaned.chars().count();
        if (3..=30).contains(&len) {
            city = Some(cleaned);
            break;
        }
    }

    (city, county)
}

fn is_postal_code(fragment: &str) -> bool {
    let len = fragment.len();
    (5..=6).contains(&len) && fragment.chars().all(|c| c.is_ascii_digit())
}

fn strip_numeric_tokens(fragment: &str) -> String {
    fragment
        .split_whitespace()
        .filter(|token| !token.chars().all(|c| c.is_ascii_digit()))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address_city_with_postal_code() {
        let (city, county) = parse_address("Calea Lugojului 45, Timișoara 300123");
        assert_eq!(city.as_deref(), Some("Timișoara"));
        assert_eq!(county.as_deref(), Some("Timiș"));
    }

    #[test]
    fn test_parse_address_with_explicit_county() {
        let (city, county) = parse_address("Str. Unirii nr. 10, Cluj-Napoca, Cluj, Romania");
        assert_eq!(city.as_deref(), Some("Cluj-Napoca"));
        assert_eq!(county.as_deref(), Some("Cluj"));
    }

    #[test]
    fn test_parse_address_bucharest_sector() {
        let (city, county) = parse_address("Splaiul Independenței 2, Sector 3");
        // Street and sector fragments are not city candidates
        assert_eq!(city, None);
        assert_eq!(county.as_deref(), Some("București"));
    }

    #[test]
    fn test_parse_address_skips_numeric_fragments() {
        let (city, county) = parse_address("Strada Gării 12, 410100, Oradea");
        assert_eq!(city.as_deref(), Some("Oradea"));
        assert_eq!(county.as_deref(), None);
    }

    #[test]
    fn test_parse_address_nothing_usable() {
        let (city, county) = parse_address("Str. Morilor nr. 3");
        assert_eq!(city, None);
        assert_eq!(county, None);
    }

    #[test]
    fn test_county_from_text_variants() {
        assert_eq!(county_from_text("undeva in judetul Bacau").as_deref(), Some("Bacău"));
        assert_eq!(county_from_text("Reșița, Caraș-Severin").as_deref(), Some("Caraș-Severin"));
        assert_eq!(county_from_text("Oltenița, Călărași").as_deref(), Some("Călărași"));
        assert_eq!(county_from_text("fara judet aici"), None);
    }

    #[test]
    fn test_canonical_county() {
        assert_eq!(canonical_county("timis"), Some("Timiș"));
        assert_eq!(canonical_county("TIMIȘ"), Some("Timiș"));
        assert_eq!(canonical_county("Bistrița-Năsăud"), Some("Bistrița-Năsăud"));
        assert_eq!(canonical_county("Satu Mare"), Some("Satu Mare"));
        // Cities are not counties
        assert_eq!(canonical_county("Timișoara"), None);
        assert_eq!(canonical_county(""), None);
    }
}
