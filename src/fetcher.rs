//! Interaction fetcher: pulls raw plant/animal interaction claims from GloBI
//! for every organism in the scientific-name list.

use std::collections::HashSet;
use std::thread;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::app::{ProgressEvent, ProgressSink};
use crate::checkpoint::CheckpointIndex;
use crate::config::InteractionSettings;
use crate::domain::{InteractionType, RAW_INTERACTION_HEADERS, RawInteraction};
use crate::error::PipelineError;
use crate::globi::{InteractionClient, InteractionRow, PageRequest, PageStrategy};
use crate::store::{AppendTable, Store, first_column_values};
use crate::table::ColumnSpec;

const NAME_COLUMNS: &[ColumnSpec] = &[ColumnSpec::required(
    "scientific_name",
    &["scientific_name"],
)];

#[derive(Debug, Clone, Default, Serialize)]
pub struct InteractionFetchResult {
    pub organisms: usize,
    pub completed: usize,
    pub skipped: usize,
    pub rows_written: usize,
    pub distinct_lookups: usize,
    pub exhausted_pages: usize,
}

/// Rows collected for one organism, deduplicated on (counterpart, label).
#[derive(Debug, Clone, Default)]
pub struct OrganismInteractions {
    pub resolved_name: String,
    pub rows: Vec<RawInteraction>,
    pub distinct_lookups: usize,
    pub exhausted_pages: usize,
}

struct OrganismCollector {
    organism_key: String,
    seen: HashSet<(String, String)>,
    out: OrganismInteractions,
}

impl OrganismCollector {
    fn new(resolved_name: String) -> Self {
        Self {
            organism_key: resolved_name.to_lowercase(),
            seen: HashSet::new(),
            out: OrganismInteractions {
                resolved_name,
                ..OrganismInteractions::default()
            },
        }
    }

    /// The counterpart is whichever side is not the organism; rows naming the
    /// organism on neither side are ignored.
    fn push_row(&mut self, row: &InteractionRow, requested: InteractionType) {
        let source = row.source_taxon_name.trim();
        let target = row.target_taxon_name.trim();
        let counterpart = if source.to_lowercase() == self.organism_key {
            target
        } else if target.to_lowercase() == self.organism_key {
            source
        } else {
            return;
        };
        let label = match row.interaction_type.trim() {
            "" => requested.as_str(),
            label => label,
        };
        self.push(counterpart, label);
    }

    fn push(&mut self, counterpart: &str, label: &str) {
        if counterpart.is_empty() {
            return;
        }
        let key = (counterpart.to_lowercase(), label.to_string());
        if !self.seen.insert(key) {
            return;
        }
        self.out.rows.push(RawInteraction {
            source_organism_name: self.out.resolved_name.clone(),
            counterpart_name: counterpart.to_string(),
            interaction_type_raw: label.to_string(),
        });
    }
}

pub struct InteractionFetcher<'a, C: InteractionClient> {
    client: &'a C,
    settings: &'a InteractionSettings,
}

impl<'a, C: InteractionClient> InteractionFetcher<'a, C> {
    pub fn new(client: &'a C, settings: &'a InteractionSettings) -> Self {
        Self { client, settings }
    }

    /// Falls back to the input name when the name service fails or knows
    /// nothing better.
    pub fn resolve_name(&self, name: &str) -> String {
        match self.client.resolve_name(name) {
            Ok(Some(resolved)) => resolved,
            Ok(None) => name.to_string(),
            Err(err) => {
                debug!(organism = name, "name resolution failed: {err}");
                name.to_string()
            }
        }
    }

    pub fn fetch_organism(&self, name: &str) -> OrganismInteractions {
        self.fetch_resolved(self.resolve_name(name))
    }

    fn fetch_resolved(&self, resolved: String) -> OrganismInteractions {
        let mut collector = OrganismCollector::new(resolved);
        for interaction in InteractionType::ALL {
            self.fetch_type(&mut collector, interaction);
        }
        collector.out
    }

    fn fetch_type(&self, collector: &mut OrganismCollector, interaction: InteractionType) {
        let organism = collector.out.resolved_name.clone();
        let mut offset = 0;
        loop {
            let request = PageRequest {
                organism: &organism,
                interaction,
                offset,
                limit: self.settings.page_limit,
            };
            let page = self.fetch_page(&request);
            thread::sleep(self.settings.page_delay);
            let Some(rows) = page else {
                collector.out.exhausted_pages += 1;
                self.fetch_distinct(collector, interaction);
                return;
            };
            for row in &rows {
                collector.push_row(row, interaction);
            }
            if rows.len() < self.settings.page_limit {
                return;
            }
            offset += self.settings.page_limit;
        }
    }

    /// First non-empty page across the strategies, each retried on its own.
    fn fetch_page(&self, request: &PageRequest<'_>) -> Option<Vec<InteractionRow>> {
        for strategy in PageStrategy::ORDER {
            for attempt in 1..=self.settings.retry.attempts {
                match self.client.fetch_page(request, strategy) {
                    Ok(rows) if !rows.is_empty() => return Some(rows),
                    Ok(_) => {}
                    Err(err) => {
                        debug!(
                            organism = request.organism,
                            interaction = %request.interaction,
                            strategy = strategy.label(),
                            attempt,
                            "page request failed: {err}"
                        );
                        thread::sleep(self.settings.retry.delay_after(attempt));
                    }
                }
            }
        }
        None
    }

    fn fetch_distinct(&self, collector: &mut OrganismCollector, interaction: InteractionType) {
        let organism = collector.out.resolved_name.clone();
        collector.out.distinct_lookups += 1;
        for attempt in 1..=self.settings.retry.attempts {
            match self.client.fetch_distinct(&organism, interaction) {
                Ok(names) if !names.is_empty() => {
                    for name in &names {
                        collector.push(name.trim(), interaction.as_str());
                    }
                    return;
                }
                Ok(_) => {}
                Err(err) => {
                    debug!(organism = %organism, interaction = %interaction, attempt, "distinct lookup failed: {err}");
                    thread::sleep(self.settings.retry.delay_after(attempt));
                }
            }
        }
        debug!(organism = %organism, interaction = %interaction, "no interactions found");
    }

    /// Fetches every organism in the scientific-name list that the checkpoint
    /// does not already record, appending rows as each organism completes.
    ///
    /// An organism counts as done under its input name or its resolved name;
    /// the output (and so a seeded log) only carries the resolved one.
    pub fn run(
        &self,
        store: &Store,
        sink: &dyn ProgressSink,
    ) -> Result<InteractionFetchResult, PipelineError> {
        let names = read_organism_names(&store.scientific_names_path())?;
        let output = store.raw_interactions_path();
        let mut checkpoint = CheckpointIndex::open(&Store::checkpoint_path(&output), || {
            first_column_values(&output)
        })?;
        let mut writer = AppendTable::open(&output, &RAW_INTERACTION_HEADERS)?;

        let mut result = InteractionFetchResult {
            organisms: names.len(),
            ..InteractionFetchResult::default()
        };
        info!(organisms = names.len(), done = checkpoint.len(), "fetching interactions");

        for (index, name) in names.iter().enumerate() {
            let position = format!("[{}/{}]", index + 1, names.len());
            if checkpoint.is_done(name) {
                skip(&mut result, sink, &position, name);
                continue;
            }

            let started = Instant::now();
            let resolved = self.resolve_name(name);
            if checkpoint.is_done(&resolved) {
                checkpoint.mark_done(name)?;
                skip(&mut result, sink, &position, name);
                continue;
            }

            sink.event(ProgressEvent {
                message: format!("phase=Fetch; {position} {name}"),
                elapsed: None,
            });
            let fetched = self.fetch_resolved(resolved);
            writer.append(&fetched.rows)?;
            checkpoint.mark_done(name)?;
            checkpoint.mark_done(&fetched.resolved_name)?;

            result.completed += 1;
            result.rows_written += fetched.rows.len();
            result.distinct_lookups += fetched.distinct_lookups;
            result.exhausted_pages += fetched.exhausted_pages;

            let marker = if fetched.rows.is_empty() { "NA" } else { "OK" };
            if fetched.rows.is_empty() {
                warn!(organism = %name, "no interactions returned");
            }
            sink.event(ProgressEvent {
                message: format!(
                    "phase=Write; {position} {name} -> {} rows {marker}",
                    fetched.rows.len()
                ),
                elapsed: Some(started.elapsed()),
            });
            thread::sleep(self.settings.organism_delay);
        }

        info!(
            rows = result.rows_written,
            completed = result.completed,
            skipped = result.skipped,
            "interaction fetch finished"
        );
        Ok(result)
    }
}

fn skip(result: &mut InteractionFetchResult, sink: &dyn ProgressSink, position: &str, name: &str) {
    result.skipped += 1;
    sink.event(ProgressEvent {
        message: format!("phase=Skip; {position} {name} already fetched"),
        elapsed: None,
    });
}

/// Trimmed, non-empty names in first-seen order.
pub fn read_organism_names(path: &camino::Utf8Path) -> Result<Vec<String>, PipelineError> {
    let table = Store::read_table(path)?;
    let columns = table.columns(NAME_COLUMNS)?;
    let mut seen = HashSet::new();
    Ok(table
        .rows
        .iter()
        .map(|row| columns.get(row, "scientific_name"))
        .filter(|name| !name.is_empty())
        .filter(|name| seen.insert(name.to_string()))
        .map(str::to_string)
        .collect())
}
