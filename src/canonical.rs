//! Canonicalization of raw interaction triples: whitespace normalization,
//! self-loop and overlong-name removal, label synonym mapping, host-family
//! collapsing and triple deduplication. Input order is preserved.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use tracing::info;

use crate::domain::{
    CANONICAL_INTERACTION_HEADERS, CanonicalInteraction, CanonicalLabel, MAX_ANIMAL_NAME_CHARS,
    RawInteraction, name_key, normalize_space,
};
use crate::error::PipelineError;
use crate::store::Store;
use crate::table::{ColumnSpec, Table};

const INTERACTION_COLUMNS: &[ColumnSpec] = &[
    ColumnSpec::required("plant", &["plant_scientific_name", "source_taxon_name"]),
    ColumnSpec::required("animal", &["animal_taxon_name", "target_taxon_name"]),
    ColumnSpec::required("type", &["interaction_type_raw", "interaction_type"]),
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CanonicalizeStats {
    pub input_rows: usize,
    pub blank_names: usize,
    pub self_loops: usize,
    pub overlong_names: usize,
    pub host_duplicates: usize,
    pub duplicate_triples: usize,
    /// Surviving rows whose label has no canonical form, by label.
    pub unmapped_labels: BTreeMap<String, usize>,
    pub output_rows: usize,
}

pub fn canonicalize(rows: &[RawInteraction]) -> (Vec<CanonicalInteraction>, CanonicalizeStats) {
    let mut stats = CanonicalizeStats {
        input_rows: rows.len(),
        ..CanonicalizeStats::default()
    };
    let mut host_pairs = HashSet::new();
    let mut triples = HashSet::new();
    let mut out = Vec::new();

    for row in rows {
        let plant = normalize_space(&row.source_organism_name);
        let animal = normalize_space(&row.counterpart_name);
        if plant.is_empty() || animal.is_empty() {
            stats.blank_names += 1;
            continue;
        }
        if name_key(&plant) == name_key(&animal) {
            stats.self_loops += 1;
            continue;
        }
        if animal.chars().count() > MAX_ANIMAL_NAME_CHARS {
            stats.overlong_names += 1;
            continue;
        }

        let label = CanonicalLabel::classify(row.interaction_type_raw.trim());
        if label.is_host() && !host_pairs.insert((name_key(&plant), name_key(&animal))) {
            stats.host_duplicates += 1;
            continue;
        }
        if !triples.insert((plant.clone(), name_key(&animal), label.as_str().to_string())) {
            stats.duplicate_triples += 1;
            continue;
        }
        if let CanonicalLabel::Unmapped(raw) = &label {
            *stats.unmapped_labels.entry(raw.clone()).or_default() += 1;
        }
        out.push(CanonicalInteraction {
            plant_scientific_name: plant,
            animal_taxon_name: animal,
            interaction_type: label.as_str().to_string(),
        });
    }

    stats.output_rows = out.len();
    (out, stats)
}

/// Reads an interaction table written by the fetcher (or a previous
/// canonical table) into raw triples.
pub fn load_interactions(table: &Table) -> Result<Vec<RawInteraction>, PipelineError> {
    let columns = table.columns(INTERACTION_COLUMNS)?;
    Ok(table
        .rows
        .iter()
        .map(|row| RawInteraction {
            source_organism_name: columns.get(row, "plant").to_string(),
            counterpart_name: columns.get(row, "animal").to_string(),
            interaction_type_raw: columns.get(row, "type").to_string(),
        })
        .collect())
}

pub fn run_canonicalize(store: &Store) -> Result<CanonicalizeStats, PipelineError> {
    let table = Store::read_table(&store.raw_interactions_path())?;
    let raw = load_interactions(&table)?;
    let (rows, stats) = canonicalize(&raw);
    Store::write_rows_atomic(
        &store.canonical_interactions_path(),
        &CANONICAL_INTERACTION_HEADERS,
        &rows,
    )?;
    info!(
        input = stats.input_rows,
        output = stats.output_rows,
        self_loops = stats.self_loops,
        host_duplicates = stats.host_duplicates,
        duplicates = stats.duplicate_triples,
        "canonical interactions written"
    );
    Ok(stats)
}
