//! Entity resolution: joins canonical interaction animals against the
//! checklist and the enrichment table, then applies the retention rule.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;
use tracing::{debug, info};

use crate::canonical::load_interactions;
use crate::checklist::Checklist;
use crate::domain::{
    CANONICAL_INTERACTION_HEADERS, CanonicalInteraction, EnrichmentRecord, SPECIES_HEADERS,
    SpeciesRecord, has_image, is_blank, is_non_animal_kingdom, mentions_extinct, name_key,
    normalize_space,
};
use crate::error::PipelineError;
use crate::store::Store;
use crate::table::{ColumnSpec, Table};

const ENRICHMENT_COLUMNS: &[ColumnSpec] = &[
    ColumnSpec::required("animal", &["animal_taxon_name", "Species Name"]),
    ColumnSpec::optional("image", &["image_url"]),
    ColumnSpec::optional("summary", &["summary"]),
];

/// Why a species was left out of the species table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    NoImage,
    NonAnimalWithoutFlags,
    Extinct,
}

/// The columns the retention rule reads, borrowed from a typed record or a
/// raw table row.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetentionFacts<'a> {
    pub image_url: &'a str,
    pub kingdom: &'a str,
    pub weed_significance: &'a str,
    pub notifiable_pest: &'a str,
    pub conservation_status: &'a str,
    pub threatened_status: &'a str,
}

impl<'a> From<&'a SpeciesRecord> for RetentionFacts<'a> {
    fn from(record: &'a SpeciesRecord) -> Self {
        Self {
            image_url: &record.image_url,
            kingdom: &record.kingdom,
            weed_significance: &record.weed_significance,
            notifiable_pest: &record.notifiable_pest,
            conservation_status: &record.conservation_status,
            threatened_status: &record.threatened_status,
        }
    }
}

/// Checks run in order; the first failing check is the reported reason.
pub fn retention_verdict(facts: RetentionFacts<'_>) -> Option<DropReason> {
    if !has_image(facts.image_url) {
        return Some(DropReason::NoImage);
    }
    if is_non_animal_kingdom(facts.kingdom)
        && is_blank(facts.weed_significance)
        && is_blank(facts.notifiable_pest)
    {
        return Some(DropReason::NonAnimalWithoutFlags);
    }
    if mentions_extinct(facts.conservation_status) || mentions_extinct(facts.threatened_status) {
        return Some(DropReason::Extinct);
    }
    None
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ResolveResult {
    pub interaction_rows: usize,
    pub distinct_animals: usize,
    pub unmatched_animals: usize,
    pub missing_enrichment: usize,
    pub species_written: usize,
    pub relationships_written: usize,
    pub dropped: BTreeMap<DropReason, usize>,
}

#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub species: Vec<SpeciesRecord>,
    pub relationships: Vec<CanonicalInteraction>,
    pub result: ResolveResult,
}

/// First row per normalized animal name wins.
pub fn index_enrichment(records: Vec<EnrichmentRecord>) -> HashMap<String, EnrichmentRecord> {
    let mut index = HashMap::new();
    for record in records {
        index
            .entry(name_key(&normalize_space(&record.animal_taxon_name)))
            .or_insert(record);
    }
    index
}

pub fn load_enrichment(table: &Table) -> Result<Vec<EnrichmentRecord>, PipelineError> {
    let columns = table.columns(ENRICHMENT_COLUMNS)?;
    Ok(table
        .rows
        .iter()
        .map(|row| EnrichmentRecord {
            animal_taxon_name: normalize_space(columns.get(row, "animal")),
            image_url: columns.get(row, "image").to_string(),
            summary: columns.get(row, "summary").to_string(),
        })
        .collect())
}

pub fn resolve(
    interactions: &[CanonicalInteraction],
    checklist: &Checklist,
    enrichment: &HashMap<String, EnrichmentRecord>,
) -> Resolution {
    let mut result = ResolveResult {
        interaction_rows: interactions.len(),
        ..ResolveResult::default()
    };
    let mut seen = HashSet::new();
    let mut species = Vec::new();
    let mut matched: HashMap<String, String> = HashMap::new();

    for interaction in interactions {
        let key = name_key(&normalize_space(&interaction.animal_taxon_name));
        if !seen.insert(key.clone()) {
            continue;
        }
        result.distinct_animals += 1;
        let Some(entry) = checklist.lookup(&key) else {
            result.unmatched_animals += 1;
            debug!(animal = %interaction.animal_taxon_name, "not in checklist");
            continue;
        };
        matched.insert(key.clone(), entry.name.clone());

        let status = checklist.status_for(entry);
        let (image_url, summary) = match enrichment.get(&key) {
            Some(found) => (found.image_url.clone(), found.summary.clone()),
            None => {
                result.missing_enrichment += 1;
                (String::new(), String::new())
            }
        };
        let record = SpeciesRecord {
            animal_taxon_name: entry.name.clone(),
            checklist_id: entry.checklist_id.clone(),
            kingdom: entry.kingdom.clone(),
            phylum: entry.phylum.clone(),
            class: entry.class.clone(),
            order: entry.order.clone(),
            family: entry.family.clone(),
            genus: entry.genus.clone(),
            vernacular_name: entry.vernacular_name.clone(),
            number_of_records: entry.number_of_records,
            conservation_status: status.conservation_status,
            threatened_status: status.threatened_status,
            weed_significance: status.weed_significance,
            notifiable_pest: status.notifiable_pest,
            image_url,
            summary,
        };
        match retention_verdict(RetentionFacts::from(&record)) {
            Some(reason) => {
                debug!(animal = %record.animal_taxon_name, ?reason, "species dropped");
                *result.dropped.entry(reason).or_default() += 1;
            }
            None => species.push(record),
        }
    }

    // Relationship rows take the checklist spelling of the animal so both
    // tables share one identity.
    let relationships = interactions
        .iter()
        .filter_map(|interaction| {
            let key = name_key(&normalize_space(&interaction.animal_taxon_name));
            matched.get(&key).map(|name| CanonicalInteraction {
                plant_scientific_name: interaction.plant_scientific_name.clone(),
                animal_taxon_name: name.clone(),
                interaction_type: interaction.interaction_type.clone(),
            })
        })
        .collect::<Vec<_>>();

    result.species_written = species.len();
    result.relationships_written = relationships.len();
    Resolution {
        species,
        relationships,
        result,
    }
}

pub fn run_resolve(store: &Store) -> Result<ResolveResult, PipelineError> {
    let interactions = load_interactions(&Store::read_table(&store.canonical_interactions_path())?)?
        .into_iter()
        .map(|raw| CanonicalInteraction {
            plant_scientific_name: raw.source_organism_name,
            animal_taxon_name: raw.counterpart_name,
            interaction_type: raw.interaction_type_raw,
        })
        .collect::<Vec<_>>();
    let checklist = Checklist::load(&store.checklist_path())?;
    let enrichment = index_enrichment(load_enrichment(&Store::read_table(
        &store.enrichment_path(),
    )?)?);

    let resolution = resolve(&interactions, &checklist, &enrichment);
    Store::write_rows_atomic(&store.species_path(), &SPECIES_HEADERS, &resolution.species)?;
    Store::write_rows_atomic(
        &store.relationships_path(),
        &CANONICAL_INTERACTION_HEADERS,
        &resolution.relationships,
    )?;

    let result = resolution.result;
    info!(
        species = result.species_written,
        relationships = result.relationships_written,
        unmatched = result.unmatched_animals,
        "species and relationship tables written"
    );
    Ok(result)
}
