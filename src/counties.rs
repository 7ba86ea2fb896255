use crate::normalize::strip_diacritics;

/// One county of the scraping plan: canonical name, plate code, and the
/// cities worth a dedicated Maps search.
pub struct County {
    pub name: &'static str,
    pub code: &'static str,
    pub cities: &'static [&'static str],
}

pub static COUNTIES: &[County] = &[
    County { name: "Alba", code: "AB", cities: &["Alba Iulia", "Aiud", "Blaj", "Sebeș", "Cugir"] },
    County { name: "Arad", code: "AR", cities: &["Arad", "Ineu", "Lipova", "Chișineu-Criș"] },
    County { name: "Argeș", code: "AG", cities: &["Pitești", "Câmpulung", "Curtea de Argeș", "Mioveni"] },
    County { name: "Bacău", code: "BC", cities: &["Bacău", "Onești", "Moinești", "Comănești"] },
    County { name: "Bihor", code: "BH", cities: &["Oradea", "Salonta", "Marghita", "Beiuș"] },
    County { name: "Bistrița-Năsăud", code: "BN", cities: &["Bistrița", "Năsăud", "Beclean"] },
    County { name: "Botoșani", code: "BT", cities: &["Botoșani", "Dorohoi", "Darabani"] },
    County { name: "Brașov", code: "BV", cities: &["Brașov", "Făgăraș", "Săcele", "Zărnești", "Codlea"] },
    County { name: "Brăila", code: "BR", cities: &["Brăila", "Ianca", "Însurăței"] },
    County { name: "București", code: "B", cities: &["București"] },
    County { name: "Buzău", code: "BZ", cities: &["Buzău", "Râmnicu Sărat", "Nehoiu"] },
    County { name: "Călărași", code: "CL", cities: &["Călărași", "Oltenița", "Lehliu-Gară"] },
    County { name: "Caraș-Severin", code: "CS", cities: &["Reșița", "Caransebeș", "Bocșa", "Oravița"] },
    County { name: "Cluj", code: "CJ", cities: &["Cluj-Napoca", "Turda", "Dej", "Câmpia Turzii", "Gherla"] },
    County { name: "Constanța", code: "CT", cities: &["Constanța", "Mangalia", "Medgidia", "Năvodari", "Cernavodă"] },
    County { name: "Covasna", code: "CV", cities: &["Sfântu Gheorghe", "Târgu Secuiesc", "Covasna"] },
    County { name: "Dâmbovița", code: "DB", cities: &["Târgoviște", "Moreni", "Pucioasa", "Găești"] },
    County { name: "Dolj", code: "DJ", cities: &["Craiova", "Băilești", "Calafat", "Filiași"] },
    County { name: "Galați", code: "GL", cities: &["Galați", "Tecuci", "Târgu Bujor"] },
    County { name: "Giurgiu", code: "GR", cities: &["Giurgiu", "Bolintin-Vale", "Mihăilești"] },
    County { name: "Gorj", code: "GJ", cities: &["Târgu Jiu", "Motru", "Rovinari", "Târgu Cărbunești"] },
    County { name: "Harghita", code: "HR", cities: &["Miercurea Ciuc", "Odorheiu Secuiesc", "Gheorgheni", "Toplița"] },
    County { name: "Hunedoara", code: "HD", cities: &["Deva", "Hunedoara", "Petroșani", "Orăștie", "Lupeni"] },
    County { name: "Ialomița", code: "IL", cities: &["Slobozia", "Fetești", "Urziceni"] },
    County { name: "Iași", code: "IS", cities: &["Iași", "Pașcani", "Târgu Frumos", "Hârlău"] },
    County { name: "Ilfov", code: "IF", cities: &["Buftea", "Voluntari", "Otopeni", "Popești-Leordeni"] },
    County { name: "Maramureș", code: "MM", cities: &["Baia Mare", "Sighetu Marmației", "Borșa", "Vișeu de Sus"] },
    County { name: "Mehedinți", code: "MH", cities: &["Drobeta-Turnu Severin", "Orșova", "Strehaia"] },
    County { name: "Mureș", code: "MS", cities: &["Târgu Mureș", "Sighișoara", "Reghin", "Târnăveni", "Luduș"] },
    County { name: "Neamț", code: "NT", cities: &["Piatra Neamț", "Roman", "Târgu Neamț", "Bicaz"] },
    County { name: "Olt", code: "OT", cities: &["Slatina", "Caracal", "Balș", "Corabia"] },
    County { name: "Prahova", code: "PH", cities: &["Ploiești", "Câmpina", "Băicoi", "Mizil", "Sinaia"] },
    County { name: "Sălaj", code: "SJ", cities: &["Zalău", "Șimleu Silvaniei", "Jibou"] },
    County { name: "Satu Mare", code: "SM", cities: &["Satu Mare", "Carei", "Negrești-Oaș", "Tășnad"] },
    County { name: "Sibiu", code: "SB", cities: &["Sibiu", "Mediaș", "Cisnădie", "Agnita", "Avrig"] },
    County { name: "Suceava", code: "SV", cities: &["Suceava", "Fălticeni", "Rădăuți", "Câmpulung Moldovenesc", "Vatra Dornei"] },
    County { name: "Teleorman", code: "TR", cities: &["Alexandria", "Roșiorii de Vede", "Turnu Măgurele", "Zimnicea"] },
    County { name: "Timiș", code: "TM", cities: &["Timișoara", "Lugoj", "Sânnicolau Mare", "Jimbolia", "Recaș"] },
    County { name: "Tulcea", code: "TL", cities: &["Tulcea", "Măcin", "Babadag"] },
    County { name: "Vâlcea", code: "VL", cities: &["Râmnicu Vâlcea", "Drăgășani", "Băbeni", "Călimănești"] },
    County { name: "Vaslui", code: "VS", cities: &["Vaslui", "Bârlad", "Huși", "Negrești"] },
    County { name: "Vrancea", code: "VN", cities: &["Focșani", "Adjud", "Mărășești", "Panciu"] },
];

/// Look up a county by name (diacritics optional) or plate code.
pub fn find(query: &str) -> Option<&'static County> {
    let folded = strip_diacritics(query).to_lowercase();
    let folded = folded.trim();
    COUNTIES.iter().find(|c| {
        strip_diacritics(c.name).to_lowercase() == folded
            || c.code.eq_ignore_ascii_case(folded)
    })
}

pub fn total_cities() -> usize {
    COUNTIES.iter().map(|c| c.cities.len()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_full_coverage() {
        // 41 counties plus the capital
        assert_eq!(COUNTIES.len(), 42);
        assert!(COUNTIES.iter().all(|c| !c.cities.is_empty()));
    }

    #[test]
    fn test_codes_unique() {
        let codes: HashSet<_> = COUNTIES.iter().map(|c| c.code).collect();
        assert_eq!(codes.len(), COUNTIES.len());
    }

    #[test]
    fn test_find_by_name_and_code() {
        assert_eq!(find("Timiș").map(|c| c.code), Some("TM"));
        assert_eq!(find("timis").map(|c| c.code), Some("TM"));
        assert_eq!(find("BN").map(|c| c.name), Some("Bistrița-Năsăud"));
        assert_eq!(find("bucuresti").map(|c| c.code), Some("B"));
        assert!(find("Atlantida").is_none());
    }
}
