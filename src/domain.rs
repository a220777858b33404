use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Placeholder the enrichment table uses for a missing image or summary.
pub const MISSING_VALUE: &str = "NA";

/// Animal names longer than this are treated as malformed extracts.
pub const MAX_ANIMAL_NAME_CHARS: usize = 80;

pub const WILDCARD_PLANT: &str = "All";

pub const RAW_INTERACTION_HEADERS: [&str; 3] =
    ["plant_scientific_name", "animal_taxon_name", "interaction_type_raw"];

pub const CANONICAL_INTERACTION_HEADERS: [&str; 3] =
    ["plant_scientific_name", "animal_taxon_name", "interaction_type"];

pub const SPECIES_HEADERS: [&str; 16] = [
    "animal_taxon_name",
    "Species",
    "Kingdom",
    "Phylum",
    "Class",
    "Order",
    "Family",
    "Genus",
    "Vernacular Name",
    "Number of Records",
    "Victoria : Conservation Status",
    "EPBC Act Threatened Species",
    "Weeds of National Significance (WoNS) as at Feb. 2013",
    "VIC State Notifiable Pests",
    "image_url",
    "summary",
];

pub const OCCURRENCE_HEADERS: [&str; 11] = [
    "animal_taxon_name",
    "decimalLatitude",
    "decimalLongitude",
    "eventDate",
    "occurrenceID",
    "recordedBy",
    "locality",
    "stateProvince",
    "country",
    "dataResourceName",
    "basisOfRecord",
];

pub const CLEAN_OCCURRENCE_HEADERS: [&str; 4] = [
    "animal_taxon_name",
    "decimalLatitude",
    "decimalLongitude",
    "eventDate",
];

pub const ENRICHMENT_HEADERS: [&str; 3] = ["animal_taxon_name", "image_url", "summary"];

pub const COMPANION_HEADERS: [&str; 4] = ["plant", "neighbour", "good_or_bad", "why"];

const NON_ANIMAL_KINGDOMS: &[&str] = &[
    "plantae",
    "bacteria",
    "chromista",
    "fungi",
    "protista",
    "virus",
    "virae",
];

/// Collapses runs of whitespace into one space and trims, keeping case.
pub fn normalize_space(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Join key for names coming from different sources.
pub fn name_key(value: &str) -> String {
    value.trim().to_lowercase()
}

pub fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

pub fn is_non_animal_kingdom(kingdom: &str) -> bool {
    let kingdom = kingdom.trim().to_lowercase();
    NON_ANIMAL_KINGDOMS.contains(&kingdom.as_str())
}

pub fn mentions_extinct(status: &str) -> bool {
    status.to_lowercase().contains("extinct")
}

pub fn has_image(image_url: &str) -> bool {
    let trimmed = image_url.trim();
    !trimmed.is_empty() && trimmed != MISSING_VALUE
}

pub fn format_coordinate(value: f64) -> String {
    format!("{value:.6}")
}

/// Interaction types requested from the interaction service, in fetch order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InteractionType {
    EatenBy,
    PreyedUponBy,
    HasParasite,
    ParasitizedBy,
    HostOf,
    HasHost,
    FlowersVisitedBy,
    InfectedBy,
    HasPathogen,
    PollinatedBy,
}

impl InteractionType {
    pub const ALL: [InteractionType; 10] = [
        InteractionType::EatenBy,
        InteractionType::PreyedUponBy,
        InteractionType::HasParasite,
        InteractionType::ParasitizedBy,
        InteractionType::HostOf,
        InteractionType::HasHost,
        InteractionType::FlowersVisitedBy,
        InteractionType::InfectedBy,
        InteractionType::HasPathogen,
        InteractionType::PollinatedBy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionType::EatenBy => "eatenBy",
            InteractionType::PreyedUponBy => "preyedUponBy",
            InteractionType::HasParasite => "hasParasite",
            InteractionType::ParasitizedBy => "parasitizedBy",
            InteractionType::HostOf => "hostOf",
            InteractionType::HasHost => "hasHost",
            InteractionType::FlowersVisitedBy => "flowersVisitedBy",
            InteractionType::InfectedBy => "infectedBy",
            InteractionType::HasPathogen => "hasPathogen",
            InteractionType::PollinatedBy => "pollinatedBy",
        }
    }

    /// Position the queried organism takes in requests for this type. Types
    /// where the plant is affected put it in the target position; types where
    /// the plant has or hosts others put it in the source position.
    pub fn role(&self) -> Role {
        match self {
            InteractionType::EatenBy
            | InteractionType::PreyedUponBy
            | InteractionType::ParasitizedBy
            | InteractionType::InfectedBy
            | InteractionType::FlowersVisitedBy
            | InteractionType::PollinatedBy
            | InteractionType::HasHost => Role::Target,
            InteractionType::HasParasite | InteractionType::HasPathogen | InteractionType::HostOf => {
                Role::Source
            }
        }
    }
}

impl fmt::Display for InteractionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Source,
    Target,
}

impl Role {
    pub fn query_param(&self) -> &'static str {
        match self {
            Role::Source => "sourceTaxon",
            Role::Target => "targetTaxon",
        }
    }
}

/// Closed vocabulary the relationship table uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanonicalType {
    Visits,
    EatenBy,
    PollinatedBy,
    HasParasite,
    HasPathogen,
    LaysEggsOn,
    HasHost,
}

impl CanonicalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalType::Visits => "visits",
            CanonicalType::EatenBy => "eatenBy",
            CanonicalType::PollinatedBy => "pollinatedBy",
            CanonicalType::HasParasite => "hasParasite",
            CanonicalType::HasPathogen => "hasPathogen",
            CanonicalType::LaysEggsOn => "laysEggsOn",
            CanonicalType::HasHost => "has Host",
        }
    }

    fn from_lookup_key(key: &str) -> Option<Self> {
        let mapped = match key {
            "visitedby" | "flowersvisitedby" | "visitsflowersof" | "visits" => {
                CanonicalType::Visits
            }
            "eatenby" | "preyeduponby" => CanonicalType::EatenBy,
            "pollinatedby" | "pollinates" => CanonicalType::PollinatedBy,
            "hasparasite" | "parasiteof" | "parasitizedby" => CanonicalType::HasParasite,
            "haspathogen" | "pathogenof" | "infectedby" => CanonicalType::HasPathogen,
            "haseggslayedonby" | "layseggson" => CanonicalType::LaysEggsOn,
            "hostof" | "hashost" => CanonicalType::HasHost,
            _ => return None,
        };
        Some(mapped)
    }
}

impl fmt::Display for CanonicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of looking a raw interaction label up in the synonym table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CanonicalLabel {
    Mapped(CanonicalType),
    Unmapped(String),
}

impl CanonicalLabel {
    /// Keys are compared case-insensitively with all whitespace removed, so
    /// `HASHOST`, `has Host` and `hasHost` share one entry.
    pub fn classify(raw: &str) -> Self {
        let key: String = raw
            .chars()
            .filter(|ch| !ch.is_whitespace())
            .collect::<String>()
            .to_lowercase();
        match CanonicalType::from_lookup_key(&key) {
            Some(mapped) => CanonicalLabel::Mapped(mapped),
            None => CanonicalLabel::Unmapped(raw.to_string()),
        }
    }

    pub fn is_host(&self) -> bool {
        matches!(self, CanonicalLabel::Mapped(CanonicalType::HasHost))
    }

    pub fn as_str(&self) -> &str {
        match self {
            CanonicalLabel::Mapped(mapped) => mapped.as_str(),
            CanonicalLabel::Unmapped(raw) => raw.as_str(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawInteraction {
    #[serde(rename = "plant_scientific_name")]
    pub source_organism_name: String,
    #[serde(rename = "animal_taxon_name")]
    pub counterpart_name: String,
    pub interaction_type_raw: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalInteraction {
    pub plant_scientific_name: String,
    pub animal_taxon_name: String,
    pub interaction_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeciesRecord {
    pub animal_taxon_name: String,
    #[serde(rename = "Species")]
    pub checklist_id: String,
    #[serde(rename = "Kingdom")]
    pub kingdom: String,
    #[serde(rename = "Phylum")]
    pub phylum: String,
    #[serde(rename = "Class")]
    pub class: String,
    #[serde(rename = "Order")]
    pub order: String,
    #[serde(rename = "Family")]
    pub family: String,
    #[serde(rename = "Genus")]
    pub genus: String,
    #[serde(rename = "Vernacular Name")]
    pub vernacular_name: String,
    #[serde(rename = "Number of Records")]
    pub number_of_records: Option<u64>,
    #[serde(rename = "Victoria : Conservation Status")]
    pub conservation_status: String,
    #[serde(rename = "EPBC Act Threatened Species")]
    pub threatened_status: String,
    #[serde(rename = "Weeds of National Significance (WoNS) as at Feb. 2013")]
    pub weed_significance: String,
    #[serde(rename = "VIC State Notifiable Pests")]
    pub notifiable_pest: String,
    pub image_url: String,
    pub summary: String,
}

/// One occurrence as fetched, provenance included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccurrenceRecord {
    pub animal_taxon_name: String,
    #[serde(rename = "decimalLatitude")]
    pub latitude: String,
    #[serde(rename = "decimalLongitude")]
    pub longitude: String,
    #[serde(rename = "eventDate")]
    pub event_date: String,
    #[serde(rename = "occurrenceID")]
    pub occurrence_id: String,
    #[serde(rename = "recordedBy")]
    pub recorded_by: String,
    pub locality: String,
    #[serde(rename = "stateProvince")]
    pub state_province: String,
    pub country: String,
    #[serde(rename = "dataResourceName")]
    pub data_resource_name: String,
    #[serde(rename = "basisOfRecord")]
    pub basis_of_record: String,
}

/// Occurrence row after provenance columns are stripped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanOccurrence {
    pub animal_taxon_name: String,
    #[serde(rename = "decimalLatitude")]
    pub latitude: String,
    #[serde(rename = "decimalLongitude")]
    pub longitude: String,
    #[serde(rename = "eventDate")]
    pub event_date: String,
}

impl From<OccurrenceRecord> for CleanOccurrence {
    fn from(record: OccurrenceRecord) -> Self {
        Self {
            animal_taxon_name: record.animal_taxon_name,
            latitude: record.latitude,
            longitude: record.longitude,
            event_date: record.event_date,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentRecord {
    pub animal_taxon_name: String,
    pub image_url: String,
    pub summary: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Relation {
    Good,
    Bad,
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Relation::Good => write!(f, "good"),
            Relation::Bad => write!(f, "bad"),
        }
    }
}

impl FromStr for Relation {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "good" => Ok(Relation::Good),
            "bad" => Ok(Relation::Bad),
            _ => Err(PipelineError::InvalidRelation(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanionRelation {
    pub plant: String,
    pub neighbour: String,
    #[serde(rename = "good_or_bad")]
    pub relation: Relation,
    #[serde(rename = "why")]
    pub reason: Option<String>,
}

impl CompanionRelation {
    pub fn is_wildcard(&self) -> bool {
        self.plant.trim() == WILDCARD_PLANT
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn host_synonyms_share_one_label() {
        for raw in ["hostOf", "HASHOST", "has Host", "hasHost", " host Of "] {
            assert_eq!(
                CanonicalLabel::classify(raw),
                CanonicalLabel::Mapped(CanonicalType::HasHost)
            );
        }
        assert_eq!(CanonicalType::HasHost.as_str(), "has Host");
    }

    #[test]
    fn unknown_label_is_kept_verbatim() {
        let label = CanonicalLabel::classify("interactsWith");
        assert_eq!(label, CanonicalLabel::Unmapped("interactsWith".to_string()));
        assert_eq!(label.as_str(), "interactsWith");
    }

    #[test]
    fn every_fetch_type_has_a_role() {
        assert_eq!(InteractionType::HostOf.role(), Role::Source);
        assert_eq!(InteractionType::HasHost.role(), Role::Target);
        assert_eq!(InteractionType::PollinatedBy.role().query_param(), "targetTaxon");
        assert_eq!(InteractionType::ALL.len(), 10);
    }

    #[test]
    fn kingdom_set_is_case_insensitive() {
        assert!(is_non_animal_kingdom(" Plantae "));
        assert!(is_non_animal_kingdom("VIRAE"));
        assert!(!is_non_animal_kingdom("Animalia"));
    }

    #[test]
    fn relation_parse() {
        assert_eq!(" Good ".parse::<Relation>().unwrap(), Relation::Good);
        let err = "maybe".parse::<Relation>().unwrap_err();
        assert_matches!(err, PipelineError::InvalidRelation(_));
    }

    #[test]
    fn image_placeholder_is_not_an_image() {
        assert!(!has_image("NA"));
        assert!(!has_image("  "));
        assert!(has_image("https://images.ala.org.au/x.jpg"));
    }
}
