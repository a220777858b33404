//! Companion planting relations: loading, validation and lookup.

use std::collections::{BTreeSet, HashSet};
use std::io::Read;

use camino::Utf8Path;
use serde::Serialize;
use tracing::info;

use crate::domain::{COMPANION_HEADERS, CompanionRelation, Relation, WILDCARD_PLANT, name_key};
use crate::error::PipelineError;
use crate::store::Store;
use crate::table::{ColumnSpec, Table};

const CANDIDATE_DELIMITERS: [u8; 4] = [b',', b'\t', b';', b'|'];

const COMPANION_COLUMNS: &[ColumnSpec] = &[
    ColumnSpec::required("plant", &["plant"]),
    ColumnSpec::required("neighbour", &["neighbour", "neighbor"]),
    ColumnSpec::required("relation", &["good_or_bad"]),
    ColumnSpec::required("why", &["why"]),
];

const REQUIRED_HEADERS: [&str; 3] = ["plant", "neighbour", "good_or_bad"];

/// Picks the delimiter that splits the header into the expected columns,
/// else the candidate that occurs most often, else a comma.
pub fn sniff_delimiter(header_line: &str) -> u8 {
    let lowered = header_line.to_lowercase();
    for delimiter in CANDIDATE_DELIMITERS {
        let fields = lowered
            .split(char::from(delimiter))
            .map(|field| field.trim().trim_matches('"').trim_start_matches('\u{feff}'))
            .collect::<HashSet<_>>();
        if REQUIRED_HEADERS.iter().all(|header| fields.contains(header)) {
            return delimiter;
        }
    }
    CANDIDATE_DELIMITERS
        .iter()
        .copied()
        .map(|delimiter| (header_line.matches(char::from(delimiter)).count(), delimiter))
        .filter(|(count, _)| *count > 0)
        .max_by_key(|(count, _)| *count)
        .map(|(_, delimiter)| delimiter)
        .unwrap_or(b',')
}

#[derive(Debug, Clone, Default)]
pub struct CompanionIndex {
    relations: Vec<CompanionRelation>,
    duplicates: usize,
}

impl CompanionIndex {
    /// Validates every row and keeps the first row per (plant, neighbour).
    pub fn from_table(table: &Table) -> Result<Self, PipelineError> {
        let columns = table.columns(COMPANION_COLUMNS)?;
        let mut seen = HashSet::new();
        let mut index = Self::default();
        for (position, row) in table.rows.iter().enumerate() {
            let line = row
                .position()
                .map(|pos| pos.line())
                .unwrap_or(position as u64 + 2);
            let invalid = |message: String| PipelineError::InvalidCompanionRow {
                file: table.name.clone(),
                line,
                message,
            };

            let plant = columns.get(row, "plant");
            let neighbour = columns.get(row, "neighbour");
            if plant.is_empty() || neighbour.is_empty() {
                return Err(invalid("plant/neighbour cannot be empty".to_string()));
            }
            let relation = columns
                .get(row, "relation")
                .parse::<Relation>()
                .map_err(|err| invalid(err.to_string()))?;
            let reason = Some(columns.get(row, "why"))
                .filter(|why| !why.is_empty())
                .map(str::to_string);

            if !seen.insert((name_key(plant), name_key(neighbour))) {
                index.duplicates += 1;
                continue;
            }
            index.relations.push(CompanionRelation {
                plant: plant.to_string(),
                neighbour: neighbour.to_string(),
                relation,
                reason,
            });
        }
        Ok(index)
    }

    pub fn load(path: &Utf8Path) -> Result<Self, PipelineError> {
        let mut sample = Vec::new();
        Store::open_input(path)?
            .take(4096)
            .read_to_end(&mut sample)
            .map_err(|err| PipelineError::Filesystem(format!("read {path}: {err}")))?;
        let sample = String::from_utf8_lossy(&sample);
        let header = sample.lines().next().unwrap_or_default();
        let table = Store::read_table_with_delimiter(path, sniff_delimiter(header))?;
        Self::from_table(&table)
    }

    pub fn relations(&self) -> &[CompanionRelation] {
        &self.relations
    }

    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    /// Rows for `plant` followed by the wildcard rows that apply to it.
    pub fn relations_for(&self, plant: &str) -> Vec<&CompanionRelation> {
        let key = name_key(plant);
        let direct = self
            .relations
            .iter()
            .filter(|relation| !relation.is_wildcard() && name_key(&relation.plant) == key);
        let wildcard = self
            .relations
            .iter()
            .filter(|relation| relation.is_wildcard() && name_key(&relation.neighbour) != key);
        direct.chain(wildcard).collect()
    }

    /// Every named plant on either side of a relation, sorted.
    pub fn plants(&self) -> Vec<String> {
        self.relations
            .iter()
            .flat_map(|relation| [relation.plant.trim(), relation.neighbour.trim()])
            .filter(|name| *name != WILDCARD_PLANT)
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CompanionResult {
    pub rows_written: usize,
    pub duplicates: usize,
    pub plants: usize,
}

pub fn run_companions(store: &Store) -> Result<CompanionResult, PipelineError> {
    let index = CompanionIndex::load(&store.companions_path())?;
    let rows_written = Store::write_rows_atomic(
        &store.companion_relations_path(),
        &COMPANION_HEADERS,
        index.relations(),
    )?;
    let result = CompanionResult {
        rows_written,
        duplicates: index.duplicates(),
        plants: index.plants().len(),
    };
    info!(rows = result.rows_written, plants = result.plants, "companion relations written");
    Ok(result)
}
