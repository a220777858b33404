//! Occurrence aggregation: per-species Victorian occurrence records from the
//! biocache, deduplicated by coordinate and capped per species, plus the
//! cleaning pass that strips provenance columns.

use std::collections::HashSet;
use std::thread;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::ala::{OccurrenceClient, OccurrenceHit};
use crate::app::{ProgressEvent, ProgressSink};
use crate::checkpoint::CheckpointIndex;
use crate::config::OccurrenceSettings;
use crate::domain::{
    CLEAN_OCCURRENCE_HEADERS, CleanOccurrence, OCCURRENCE_HEADERS, OccurrenceRecord,
    format_coordinate, name_key, normalize_space,
};
use crate::enrichment::is_queryable_name;
use crate::error::PipelineError;
use crate::store::{AppendTable, Store, first_column_values};
use crate::table::{ColumnSpec, Table};

const SPECIES_NAME_COLUMN: &[ColumnSpec] = &[ColumnSpec::required(
    "animal",
    &["animal_taxon_name", "Species Name"],
)];

const OCCURRENCE_COLUMNS: &[ColumnSpec] = &[
    ColumnSpec::required("animal", &["animal_taxon_name"]),
    ColumnSpec::required("lat", &["decimalLatitude", "latitude", "lat"]),
    ColumnSpec::required("lon", &["decimalLongitude", "longitude", "lon"]),
    ColumnSpec::optional("date", &["eventDate"]),
];

#[derive(Debug, Clone, Default, Serialize)]
pub struct OccurrenceFetchResult {
    pub species: usize,
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub rows_written: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpeciesOutcome {
    pub kept: usize,
    pub pages: usize,
    /// False when a page request failed after its retries; the species is
    /// then fetched again on the next run.
    pub complete: bool,
}

/// Per-species dedup state. Keys are coordinates formatted to six decimals.
struct CoordinateFilter {
    seen: HashSet<(String, String)>,
    cap: Option<usize>,
}

impl CoordinateFilter {
    fn new(cap: Option<usize>) -> Self {
        Self {
            seen: HashSet::new(),
            cap,
        }
    }

    fn is_full(&self) -> bool {
        self.cap.is_some_and(|cap| self.seen.len() >= cap)
    }

    fn admit(&mut self, species: &str, hit: &OccurrenceHit) -> Option<OccurrenceRecord> {
        let (Some(lat), Some(lon)) = (hit.latitude, hit.longitude) else {
            return None;
        };
        let key = (format_coordinate(lat), format_coordinate(lon));
        if !self.seen.insert(key.clone()) {
            return None;
        }
        Some(OccurrenceRecord {
            animal_taxon_name: species.to_string(),
            latitude: key.0,
            longitude: key.1,
            event_date: hit.event_date.clone(),
            occurrence_id: hit.occurrence_id.clone(),
            recorded_by: hit.recorded_by.clone(),
            locality: hit.locality.clone(),
            state_province: hit.state_province.clone(),
            country: hit.country.clone(),
            data_resource_name: hit.data_resource_name.clone(),
            basis_of_record: hit.basis_of_record.clone(),
        })
    }
}

pub struct OccurrenceAggregator<'a, C: OccurrenceClient> {
    client: &'a C,
    settings: &'a OccurrenceSettings,
}

impl<'a, C: OccurrenceClient> OccurrenceAggregator<'a, C> {
    pub fn new(client: &'a C, settings: &'a OccurrenceSettings) -> Self {
        Self { client, settings }
    }

    /// Pages through one species, appending each page's new rows before the
    /// next request.
    pub fn fetch_species(
        &self,
        species: &str,
        writer: &mut AppendTable,
    ) -> Result<SpeciesOutcome, PipelineError> {
        let page_size = self.settings.page_size;
        let mut filter = CoordinateFilter::new(self.settings.max_per_species);
        let mut outcome = SpeciesOutcome::default();
        let mut start = 0;

        loop {
            let page = match self.client.search_occurrences(species, start, page_size) {
                Ok(page) => page,
                Err(err) => {
                    warn!(species, start, "occurrence page failed: {err}");
                    return Ok(outcome);
                }
            };
            if page.hits.is_empty() {
                break;
            }
            outcome.pages += 1;

            let mut rows = Vec::new();
            for hit in &page.hits {
                if filter.is_full() {
                    break;
                }
                if let Some(row) = filter.admit(species, hit) {
                    rows.push(row);
                }
            }
            outcome.kept += writer.append(&rows)?;
            debug!(
                species,
                page = outcome.pages,
                rows = rows.len(),
                kept = outcome.kept,
                total = ?page.total_records,
                "occurrence page written"
            );

            if filter.is_full() || page.hits.len() < page_size {
                break;
            }
            start += page_size;
            thread::sleep(self.settings.rate_limit);
        }

        outcome.complete = true;
        Ok(outcome)
    }

    pub fn run(
        &self,
        store: &Store,
        sink: &dyn ProgressSink,
    ) -> Result<OccurrenceFetchResult, PipelineError> {
        let species = species_names(&Store::read_table(&store.species_path())?)?;
        let output = store.occurrences_path();
        let mut checkpoint = CheckpointIndex::open(&Store::checkpoint_path(&output), || {
            first_column_values(&output)
        })?;
        let mut writer = AppendTable::open(&output, &OCCURRENCE_HEADERS)?;
        let mut result = OccurrenceFetchResult {
            species: species.len(),
            ..OccurrenceFetchResult::default()
        };
        info!(species = species.len(), done = checkpoint.len(), "fetching occurrences");

        for (index, name) in species.iter().enumerate() {
            let position = format!("[{}/{}]", index + 1, species.len());
            if !is_queryable_name(name) || checkpoint.is_done(name) {
                result.skipped += 1;
                continue;
            }
            let started = Instant::now();
            sink.event(ProgressEvent {
                message: format!("phase=Fetch; {position} {name}"),
                elapsed: None,
            });
            let outcome = self.fetch_species(name, &mut writer)?;
            result.rows_written += outcome.kept;
            let marker = if outcome.complete {
                checkpoint.mark_done(name)?;
                result.completed += 1;
                "OK"
            } else {
                result.failed += 1;
                "error"
            };
            sink.event(ProgressEvent {
                message: format!("phase=Write; {position} {name} -> {} rows {marker}", outcome.kept),
                elapsed: Some(started.elapsed()),
            });
            thread::sleep(self.settings.rate_limit);
        }

        info!(
            rows = result.rows_written,
            completed = result.completed,
            failed = result.failed,
            "occurrence fetch finished"
        );
        Ok(result)
    }
}

/// Distinct whitespace-normalized animal names in table order.
pub fn species_names(table: &Table) -> Result<Vec<String>, PipelineError> {
    let columns = table.columns(SPECIES_NAME_COLUMN)?;
    let mut seen = HashSet::new();
    Ok(table
        .rows
        .iter()
        .map(|row| normalize_space(columns.get(row, "animal")))
        .filter(|name| !name.is_empty() && seen.insert(name.clone()))
        .collect())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanResult {
    pub input_rows: usize,
    pub invalid_coordinates: usize,
    pub duplicates: usize,
    pub output_rows: usize,
}

/// Keeps species, coordinates and date, dropping rows without parseable
/// coordinates and repeats of a (species, lat, lon) key.
pub fn clean_occurrences(table: &Table) -> Result<(Vec<CleanOccurrence>, CleanResult), PipelineError> {
    let columns = table.columns(OCCURRENCE_COLUMNS)?;
    let mut result = CleanResult {
        input_rows: table.len(),
        ..CleanResult::default()
    };
    let mut seen = HashSet::new();
    let mut rows = Vec::new();
    for row in &table.rows {
        let lat = columns.get(row, "lat").parse::<f64>().ok().filter(|v| v.is_finite());
        let lon = columns.get(row, "lon").parse::<f64>().ok().filter(|v| v.is_finite());
        let (Some(lat), Some(lon)) = (lat, lon) else {
            result.invalid_coordinates += 1;
            continue;
        };
        let species = columns.get(row, "animal");
        let (lat, lon) = (format_coordinate(lat), format_coordinate(lon));
        if !seen.insert((name_key(species), lat.clone(), lon.clone())) {
            result.duplicates += 1;
            continue;
        }
        rows.push(CleanOccurrence {
            animal_taxon_name: species.to_string(),
            latitude: lat,
            longitude: lon,
            event_date: columns.get(row, "date").to_string(),
        });
    }
    result.output_rows = rows.len();
    Ok((rows, result))
}

pub fn run_clean(store: &Store) -> Result<CleanResult, PipelineError> {
    let table = Store::read_table(&store.occurrences_path())?;
    let (rows, result) = clean_occurrences(&table)?;
    Store::write_rows_atomic(&store.occurrences_cleaned_path(), &CLEAN_OCCURRENCE_HEADERS, &rows)?;
    info!(
        input = result.input_rows,
        output = result.output_rows,
        duplicates = result.duplicates,
        "cleaned occurrences written"
    );
    Ok(result)
}
