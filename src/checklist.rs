//! Taxonomic checklist loading and name lookup.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::collections::hash_map::Entry;

use camino::Utf8Path;
use tracing::debug;

use crate::domain::{name_key, normalize_space};
use crate::error::PipelineError;
use crate::store::Store;
use crate::table::{ColumnSpec, Table};

const CHECKLIST_COLUMNS: &[ColumnSpec] = &[
    ColumnSpec::required(
        "name",
        &["Species Name", "scientific_name", "animal_taxon_name"],
    ),
    ColumnSpec::optional("id", &["Species"]),
    ColumnSpec::required("kingdom", &["Kingdom"]),
    ColumnSpec::optional("phylum", &["Phylum"]),
    ColumnSpec::optional("class", &["Class"]),
    ColumnSpec::optional("order", &["Order"]),
    ColumnSpec::optional("family", &["Family"]),
    ColumnSpec::optional("genus", &["Genus"]),
    ColumnSpec::optional("vernacular", &["Vernacular Name"]),
    ColumnSpec::optional("records", &["Number of records"]).containing(&["number of records"]),
    ColumnSpec::optional("conservation", &["Victoria : Conservation Status"])
        .containing(&["conservation status"]),
    ColumnSpec::optional("threatened", &["EPBC Act Threatened Species"]).containing(&["epbc"]),
    ColumnSpec::optional("weeds", &[]).containing(&["weeds of national significance"]),
    ColumnSpec::optional("pests", &["VIC State Notifiable Pests"])
        .containing(&["notifiable pests"]),
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChecklistEntry {
    pub name: String,
    pub checklist_id: String,
    pub kingdom: String,
    pub phylum: String,
    pub class: String,
    pub order: String,
    pub family: String,
    pub genus: String,
    pub vernacular_name: String,
    pub number_of_records: Option<u64>,
    pub status: ChecklistStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChecklistStatus {
    pub conservation_status: String,
    pub threatened_status: String,
    pub weed_significance: String,
    pub notifiable_pest: String,
}

/// Checklist rows indexed by normalized name and by checklist identifier.
///
/// Several rows can share a name key (synonyms, subspecies rolled up to the
/// same binomial). The name index keeps the row with the most records, then
/// the lexicographically smallest identifier, so lookups do not depend on
/// file order.
#[derive(Debug, Clone, Default)]
pub struct Checklist {
    entries: Vec<ChecklistEntry>,
    by_name: HashMap<String, usize>,
    by_id: HashMap<String, usize>,
    shared_names: usize,
}

impl Checklist {
    pub fn from_entries(entries: Vec<ChecklistEntry>) -> Self {
        let mut by_name: HashMap<String, usize> = HashMap::new();
        let mut by_id = HashMap::new();
        let mut shared_names = 0;
        for (index, entry) in entries.iter().enumerate() {
            if !entry.checklist_id.is_empty() {
                by_id.entry(entry.checklist_id.clone()).or_insert(index);
            }
            let key = name_key(&normalize_space(&entry.name));
            if key.is_empty() {
                continue;
            }
            match by_name.entry(key) {
                Entry::Vacant(slot) => {
                    slot.insert(index);
                }
                Entry::Occupied(mut slot) => {
                    shared_names += 1;
                    if prefer(entry, &entries[*slot.get()]) == Ordering::Less {
                        slot.insert(index);
                    }
                }
            }
        }
        Self {
            entries,
            by_name,
            by_id,
            shared_names,
        }
    }

    pub fn load(path: &Utf8Path) -> Result<Self, PipelineError> {
        let table = Store::read_table(path)?;
        let checklist = Self::from_table(&table)?;
        debug!(
            path = %path,
            rows = checklist.len(),
            shared_names = checklist.shared_names,
            "checklist loaded"
        );
        Ok(checklist)
    }

    pub fn from_table(table: &Table) -> Result<Self, PipelineError> {
        let columns = table.columns(CHECKLIST_COLUMNS)?;
        let entries = table
            .rows
            .iter()
            .map(|row| ChecklistEntry {
                name: normalize_space(columns.get(row, "name")),
                checklist_id: columns.get(row, "id").to_string(),
                kingdom: columns.get(row, "kingdom").to_string(),
                phylum: columns.get(row, "phylum").to_string(),
                class: columns.get(row, "class").to_string(),
                order: columns.get(row, "order").to_string(),
                family: columns.get(row, "family").to_string(),
                genus: columns.get(row, "genus").to_string(),
                vernacular_name: columns.get(row, "vernacular").to_string(),
                number_of_records: parse_count(columns.get(row, "records")),
                status: ChecklistStatus {
                    conservation_status: columns.get(row, "conservation").to_string(),
                    threatened_status: columns.get(row, "threatened").to_string(),
                    weed_significance: columns.get(row, "weeds").to_string(),
                    notifiable_pest: columns.get(row, "pests").to_string(),
                },
            })
            .collect();
        Ok(Self::from_entries(entries))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of rows whose name key was already taken by an earlier row.
    pub fn shared_names(&self) -> usize {
        self.shared_names
    }

    pub fn lookup(&self, name: &str) -> Option<&ChecklistEntry> {
        self.by_name
            .get(&name_key(&normalize_space(name)))
            .map(|index| &self.entries[*index])
    }

    /// Status flags for an entry: by identifier when it has one that the
    /// checklist knows, otherwise by name.
    pub fn status_for(&self, entry: &ChecklistEntry) -> ChecklistStatus {
        self.by_id
            .get(&entry.checklist_id)
            .map(|index| &self.entries[*index])
            .or_else(|| self.lookup(&entry.name))
            .map(|found| found.status.clone())
            .unwrap_or_default()
    }
}

/// `Less` when `candidate` should replace `current` in the name index.
fn prefer(candidate: &ChecklistEntry, current: &ChecklistEntry) -> Ordering {
    current
        .number_of_records
        .cmp(&candidate.number_of_records)
        .then_with(|| candidate.checklist_id.cmp(&current.checklist_id))
}

/// Counts are exported with thousands separators or as floats.
fn parse_count(value: &str) -> Option<u64> {
    let cleaned = value.trim().replace(',', "");
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<u64>().ok().or_else(|| {
        cleaned
            .parse::<f64>()
            .ok()
            .filter(|count| count.is_finite() && *count >= 0.0)
            .map(|count| count as u64)
    })
}
