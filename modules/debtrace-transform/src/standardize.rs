//! Name standardization against configured alias maps.
//!
//! Each mapping file pairs a canonical value with the spellings seen
//! in the wild, either as `{"India": ["india", "indien"]}` or as
//! `{"India": {"aliases": [...], "iso2_code": "IN"}}`. Lookups are
//! lowercase-and-trim; anything unmapped becomes "Unknown".

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::{Result, TransformError};

const UNKNOWN_VALUE: &str = "Unknown";

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MappingEntry {
    Aliases(Vec<String>),
    Detailed {
        aliases: Vec<String>,
        #[serde(default)]
        iso2_code: Option<String>,
    },
}

impl MappingEntry {
    fn aliases(&self) -> &[String] {
        match self {
            MappingEntry::Aliases(aliases) => aliases,
            MappingEntry::Detailed { aliases, .. } => aliases,
        }
    }
}

fn load_mapping_file(path: &str) -> Result<HashMap<String, MappingEntry>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| TransformError::Reference(format!("failed to load \"{path}\". {e}")))?;
    serde_json::from_str(&raw)
        .map_err(|e| TransformError::Reference(format!("\"{path}\" is not a valid mapping. {e}")))
}

fn alias_map(entries: &HashMap<String, MappingEntry>) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for (canonical, entry) in entries {
        for alias in entry.aliases() {
            map.insert(alias.trim().to_lowercase(), canonical.clone());
        }
        // The canonical spelling maps to itself.
        map.insert(canonical.trim().to_lowercase(), canonical.clone());
    }
    map
}

pub struct NameStandardizer {
    countries: HashMap<String, String>,
    statuses: HashMap<String, String>,
    sectors: HashMap<String, String>,
}

impl NameStandardizer {
    pub fn from_config_dir(config_dir: &str) -> Result<Self> {
        let countries = load_mapping_file(&format!("{config_dir}/countries.json"))?;
        let statuses = load_mapping_file(&format!("{config_dir}/statuses.json"))?;
        let sectors = load_mapping_file(&format!("{config_dir}/sectors.json"))?;
        Ok(Self {
            countries: alias_map(&countries),
            statuses: alias_map(&statuses),
            sectors: alias_map(&sectors),
        })
    }

    /// Test constructor over literal alias maps (alias → canonical).
    pub fn from_maps(
        countries: HashMap<String, String>,
        statuses: HashMap<String, String>,
        sectors: HashMap<String, String>,
    ) -> Self {
        Self {
            countries,
            statuses,
            sectors,
        }
    }

    /// Maps a raw status to one of the canonical project statuses.
    pub fn standardize_status(&self, raw: &str) -> String {
        self.statuses
            .get(raw.trim().to_lowercase().as_str())
            .cloned()
            .unwrap_or_else(|| UNKNOWN_VALUE.to_string())
    }

    /// Standardizes a comma-separated country list: each element is
    /// mapped individually and the result is sorted and re-joined.
    pub fn standardize_country_list(&self, raw: &str) -> String {
        standardize_list(&self.countries, raw)
    }

    pub fn standardize_sector_list(&self, raw: &str) -> String {
        standardize_list(&self.sectors, raw)
    }
}

fn standardize_list(mapping: &HashMap<String, String>, raw: &str) -> String {
    let mut values: Vec<String> = raw
        .split(',')
        .map(|element| {
            mapping
                .get(element.trim().to_lowercase().as_str())
                .cloned()
                .unwrap_or_else(|| UNKNOWN_VALUE.to_string())
        })
        .collect();
    values.sort();
    values.join(", ")
}

/// Reads the canonical-country → ISO-2 mapping out of the countries
/// file; used to pick the exchange-rate country for a project.
pub fn load_country_codes(config_dir: &str) -> Result<HashMap<String, String>> {
    let entries = load_mapping_file(&format!("{config_dir}/countries.json"))?;
    let mut codes = HashMap::new();
    for (canonical, entry) in entries {
        if let MappingEntry::Detailed {
            iso2_code: Some(code),
            ..
        } = entry
        {
            codes.insert(canonical, code);
        }
    }
    Ok(codes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn standardizer() -> NameStandardizer {
        let countries = serde_json::from_str::<HashMap<String, MappingEntry>>(
            r#"{
                "India": {"aliases": ["india", "indien", "republic of india"], "iso2_code": "IN"},
                "Kosovo": {"aliases": ["kosovo", "kosovo*"], "iso2_code": "XK"}
            }"#,
        )
        .unwrap();
        let statuses = serde_json::from_str::<HashMap<String, MappingEntry>>(
            r#"{
                "Pending": ["board approved, pending signing", "proposed"],
                "Cancelled": ["dropped", "terminated"]
            }"#,
        )
        .unwrap();
        let sectors = serde_json::from_str::<HashMap<String, MappingEntry>>(
            r#"{
                "Agribusiness": ["ac - mini-mills", "agriculture"],
                "Manufacturing": ["f-ab - sugar and confectionery"]
            }"#,
        )
        .unwrap();
        NameStandardizer::from_maps(alias_map(&countries), alias_map(&statuses), alias_map(&sectors))
    }

    #[test]
    fn country_lists_standardize_sorted_and_canonical() {
        let standardizer = standardizer();
        assert_eq!(
            standardizer.standardize_country_list("kosovo*,indien"),
            "India, Kosovo"
        );
    }

    #[test]
    fn statuses_map_to_the_canonical_four() {
        let standardizer = standardizer();
        assert_eq!(
            standardizer.standardize_status("board approved, pending signing"),
            "Pending"
        );
        assert_eq!(standardizer.standardize_status("dropped"), "Cancelled");
    }

    #[test]
    fn sector_lists_standardize_sorted_and_canonical() {
        let standardizer = standardizer();
        assert_eq!(
            standardizer
                .standardize_sector_list("ac - mini-mills,f-ab - sugar and confectionery"),
            "Agribusiness, Manufacturing"
        );
    }

    #[test]
    fn unmapped_values_become_unknown() {
        let standardizer = standardizer();
        assert_eq!(standardizer.standardize_status("weird state"), "Unknown");
        assert_eq!(
            standardizer.standardize_country_list("atlantis, indien"),
            "India, Unknown"
        );
    }

    #[test]
    fn canonical_spellings_map_to_themselves() {
        let standardizer = standardizer();
        assert_eq!(standardizer.standardize_country_list("India"), "India");
    }
}
