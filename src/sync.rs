//! Cascade synchronization: the species table decides which animals exist;
//! relationship and occurrence rows for any other animal are removed.

use std::collections::{BTreeMap, HashSet};

use camino::Utf8Path;
use serde::Serialize;
use tracing::{info, warn};

use crate::domain::name_key;
use crate::error::PipelineError;
use crate::resolver::{DropReason, RetentionFacts, retention_verdict};
use crate::store::Store;
use crate::table::{ColumnMap, ColumnSpec, Table};

const SPECIES_COLUMNS: &[ColumnSpec] = &[
    ColumnSpec::required("animal", &["animal_taxon_name"]),
    ColumnSpec::required("kingdom", &["Kingdom"]),
    ColumnSpec::required("image", &["image_url"]),
    ColumnSpec::optional("weeds", &[]).containing(&["weeds of national significance"]),
    ColumnSpec::optional("pests", &[]).containing(&["vic state notifiable pests"]),
    ColumnSpec::optional("conservation", &[]).containing(&["conservation status"]),
    ColumnSpec::optional("threatened", &[]).containing(&["epbc"]),
];

const ANIMAL_COLUMN: &[ColumnSpec] = &[ColumnSpec::required(
    "animal",
    &["animal_taxon_name", "animal_taxon_name_y", "animal_taxon_name_x"],
)];

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncResult {
    pub species_kept: usize,
    pub species_removed: usize,
    pub removed_by_reason: BTreeMap<DropReason, usize>,
    pub relationships_removed: usize,
    pub relationships_kept: usize,
    pub occurrences_removed: Option<usize>,
    pub occurrences_kept: Option<usize>,
}

/// Drops failing species rows in place and returns the keys of the rows kept.
pub fn prune_species(
    species: &mut Table,
    result: &mut SyncResult,
) -> Result<HashSet<String>, PipelineError> {
    let columns = species.columns(SPECIES_COLUMNS)?;
    let mut kept = HashSet::new();
    let mut removed_by_reason = BTreeMap::new();
    let removed = species.retain(|row| {
        let facts = facts_for(&columns, row);
        match retention_verdict(facts) {
            Some(reason) => {
                *removed_by_reason.entry(reason).or_insert(0) += 1;
                false
            }
            None => {
                kept.insert(name_key(columns.get(row, "animal")));
                true
            }
        }
    });
    result.species_removed = removed;
    result.species_kept = species.len();
    result.removed_by_reason = removed_by_reason;
    Ok(kept)
}

fn facts_for<'r>(columns: &ColumnMap, row: &'r csv::StringRecord) -> RetentionFacts<'r> {
    RetentionFacts {
        image_url: columns.get(row, "image"),
        kingdom: columns.get(row, "kingdom"),
        weed_significance: columns.get(row, "weeds"),
        notifiable_pest: columns.get(row, "pests"),
        conservation_status: columns.get(row, "conservation"),
        threatened_status: columns.get(row, "threatened"),
    }
}

/// Removes rows whose animal is not in `kept`; returns the number removed.
pub fn retain_animals(table: &mut Table, kept: &HashSet<String>) -> Result<usize, PipelineError> {
    let columns = table.columns(ANIMAL_COLUMN)?;
    Ok(table.retain(|row| kept.contains(&name_key(columns.get(row, "animal")))))
}

fn sync_dependent(
    path: &Utf8Path,
    kept: &HashSet<String>,
) -> Result<Option<(usize, usize)>, PipelineError> {
    if !path.as_std_path().is_file() {
        warn!(path = %path, "table not found, skipping");
        return Ok(None);
    }
    let mut table = Store::read_table(path)?;
    let removed = retain_animals(&mut table, kept)?;
    Store::write_table_atomic(path, &table)?;
    Ok(Some((removed, table.len())))
}

pub fn run_sync(store: &Store) -> Result<SyncResult, PipelineError> {
    let species_path = store.species_path();
    let mut species = Store::read_table(&species_path)?;
    let mut result = SyncResult::default();
    let kept = prune_species(&mut species, &mut result)?;
    Store::write_table_atomic(&species_path, &species)?;

    if let Some((removed, remaining)) = sync_dependent(&store.relationships_path(), &kept)? {
        result.relationships_removed = removed;
        result.relationships_kept = remaining;
    }
    if let Some((removed, remaining)) = sync_dependent(&store.occurrences_cleaned_path(), &kept)? {
        result.occurrences_removed = Some(removed);
        result.occurrences_kept = Some(remaining);
    }

    info!(
        species_kept = result.species_kept,
        species_removed = result.species_removed,
        relationships_removed = result.relationships_removed,
        "tables synchronized"
    );
    Ok(result)
}
