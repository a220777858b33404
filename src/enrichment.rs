//! Per-animal image and summary lookup, written one row per animal to the
//! enrichment table.

use std::collections::HashSet;
use std::thread;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info};

use crate::ala::{EnrichmentClient, quote_term};
use crate::app::{ProgressEvent, ProgressSink};
use crate::canonical::load_interactions;
use crate::checklist::Checklist;
use crate::checkpoint::CheckpointIndex;
use crate::config::EnrichmentSettings;
use crate::domain::{ENRICHMENT_HEADERS, EnrichmentRecord, MISSING_VALUE, normalize_space};
use crate::error::PipelineError;
use crate::store::{AppendTable, Store, first_column_values};

#[derive(Debug, Clone, Default, Serialize)]
pub struct EnrichmentResult {
    pub animals: usize,
    pub completed: usize,
    pub skipped: usize,
    pub images_found: usize,
    pub summaries_found: usize,
}

/// Collapses whitespace and shortens to at most `max_chars` characters,
/// cutting at the last full stop inside the limit when there is one.
pub fn clean_summary(text: &str, max_chars: usize) -> String {
    let collapsed = normalize_space(text);
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }
    let head: String = collapsed.chars().take(max_chars).collect();
    let cut = head.rfind('.').unwrap_or(head.len());
    format!("{}…", head[..cut].trim())
}

/// Names that cannot be species: empty cells and URLs pasted into name
/// columns.
pub fn is_queryable_name(name: &str) -> bool {
    let name = name.trim();
    !name.is_empty() && !name.to_lowercase().starts_with("http")
}

pub struct EnrichmentFetcher<'a, C: EnrichmentClient> {
    client: &'a C,
    settings: &'a EnrichmentSettings,
}

impl<'a, C: EnrichmentClient> EnrichmentFetcher<'a, C> {
    pub fn new(client: &'a C, settings: &'a EnrichmentSettings) -> Self {
        Self { client, settings }
    }

    pub fn image_url(&self, name: &str) -> Option<String> {
        let term = quote_term(name);
        let queries = [
            format!("taxon_name:\"{term}\""),
            format!("scientificName:\"{term}\""),
            format!("\"{term}\""),
        ];
        queries.iter().find_map(|query| match self.client.image_url(query) {
            Ok(found) => found,
            Err(err) => {
                debug!(animal = name, query = %query, "image lookup failed: {err}");
                None
            }
        })
    }

    /// Species profile text first, then the encyclopedia extract.
    pub fn summary(&self, name: &str) -> Option<String> {
        let from_species = || -> Result<Option<String>, PipelineError> {
            let Some(guid) = self.client.species_guid(name)? else {
                return Ok(None);
            };
            self.client.species_description(&guid)
        };
        let text = match from_species() {
            Ok(Some(text)) => Some(text),
            Ok(None) => None,
            Err(err) => {
                debug!(animal = name, "species summary failed: {err}");
                None
            }
        };
        let text = text.or_else(|| match self.client.wikipedia_extract(name) {
            Ok(found) => found,
            Err(err) => {
                debug!(animal = name, "wikipedia summary failed: {err}");
                None
            }
        })?;
        let cleaned = clean_summary(&text, self.settings.summary_max_chars);
        (!cleaned.is_empty()).then_some(cleaned)
    }

    pub fn enrich(&self, name: &str) -> EnrichmentRecord {
        EnrichmentRecord {
            animal_taxon_name: name.to_string(),
            image_url: self
                .image_url(name)
                .unwrap_or_else(|| MISSING_VALUE.to_string()),
            summary: self
                .summary(name)
                .unwrap_or_else(|| MISSING_VALUE.to_string()),
        }
    }

    pub fn run(
        &self,
        store: &Store,
        sink: &dyn ProgressSink,
    ) -> Result<EnrichmentResult, PipelineError> {
        let animals = documented_animals(store)?;
        let output = store.enrichment_path();
        let mut checkpoint = CheckpointIndex::open(&Store::checkpoint_path(&output), || {
            first_column_values(&output)
        })?;
        let mut writer = AppendTable::open(&output, &ENRICHMENT_HEADERS)?;
        let mut result = EnrichmentResult {
            animals: animals.len(),
            ..EnrichmentResult::default()
        };
        info!(animals = animals.len(), done = checkpoint.len(), "fetching images and summaries");

        for (index, name) in animals.iter().enumerate() {
            let position = format!("[{}/{}]", index + 1, animals.len());
            if checkpoint.is_done(name) {
                result.skipped += 1;
                continue;
            }
            let started = Instant::now();
            let record = self.enrich(name);
            writer.append(std::slice::from_ref(&record))?;
            checkpoint.mark_done(name)?;

            result.completed += 1;
            let image_marker = if record.image_url == MISSING_VALUE {
                "NA"
            } else {
                result.images_found += 1;
                "OK"
            };
            if record.summary != MISSING_VALUE {
                result.summaries_found += 1;
            }
            sink.event(ProgressEvent {
                message: format!(
                    "phase=Write; {position} {name} -> image: {image_marker}, summary: {}",
                    preview(&record.summary)
                ),
                elapsed: Some(started.elapsed()),
            });
            thread::sleep(self.settings.rate_limit);
        }

        info!(
            completed = result.completed,
            images = result.images_found,
            summaries = result.summaries_found,
            "enrichment finished"
        );
        Ok(result)
    }
}

/// Distinct canonical interaction animals that the checklist knows, in the
/// checklist spelling.
pub fn documented_animals(store: &Store) -> Result<Vec<String>, PipelineError> {
    let interactions = load_interactions(&Store::read_table(&store.canonical_interactions_path())?)?;
    let checklist = Checklist::load(&store.checklist_path())?;
    let mut seen = HashSet::new();
    Ok(interactions
        .iter()
        .filter_map(|row| checklist.lookup(&row.counterpart_name))
        .map(|entry| entry.name.clone())
        .filter(|name| is_queryable_name(name))
        .filter(|name| seen.insert(name.clone()))
        .collect())
}

fn preview(summary: &str) -> String {
    if summary.chars().count() <= 60 {
        return summary.to_string();
    }
    let head: String = summary.chars().take(60).collect();
    format!("{head}…")
}
