use std::time::{Duration, Instant};

use serde::Serialize;

use crate::ala::{EnrichmentClient, OccurrenceClient};
use crate::canonical::{CanonicalizeStats, run_canonicalize};
use crate::companion::{CompanionResult, run_companions};
use crate::config::ResolvedConfig;
use crate::enrichment::{EnrichmentFetcher, EnrichmentResult};
use crate::error::PipelineError;
use crate::fetcher::{InteractionFetchResult, InteractionFetcher};
use crate::globi::InteractionClient;
use crate::occurrence::{CleanResult, OccurrenceAggregator, OccurrenceFetchResult, run_clean};
use crate::resolver::{ResolveResult, run_resolve};
use crate::store::Store;
use crate::sync::{SyncResult, run_sync};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressSinkKind {
    Interactions,
    Canonicalize,
    Resolve,
    Enrichment,
    Occurrences,
    CleanOccurrences,
    Sync,
    Companions,
    Run,
}

impl ProgressSinkKind {
    pub fn label(self) -> &'static str {
        match self {
            ProgressSinkKind::Interactions => "fetch-interactions",
            ProgressSinkKind::Canonicalize => "canonicalize",
            ProgressSinkKind::Resolve => "resolve",
            ProgressSinkKind::Enrichment => "fetch-enrichment",
            ProgressSinkKind::Occurrences => "fetch-occurrences",
            ProgressSinkKind::CleanOccurrences => "clean-occurrences",
            ProgressSinkKind::Sync => "sync",
            ProgressSinkKind::Companions => "companions",
            ProgressSinkKind::Run => "run",
        }
    }
}

/// Progress messages use a `phase=<Phase>; <detail>` prefix that the
/// dashboard parses.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub canonicalize: CanonicalizeStats,
    pub resolve: ResolveResult,
    pub sync: SyncResult,
}

/// Every command's outcome, for printing.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum StageReport {
    FetchInteractions(InteractionFetchResult),
    Canonicalize(CanonicalizeStats),
    Resolve(ResolveResult),
    FetchEnrichment(EnrichmentResult),
    FetchOccurrences(OccurrenceFetchResult),
    CleanOccurrences(CleanResult),
    Sync(SyncResult),
    Companions(CompanionResult),
    Run(RunResult),
}

#[derive(Clone)]
pub struct App<G: InteractionClient, A: OccurrenceClient + EnrichmentClient> {
    config: ResolvedConfig,
    store: Store,
    globi: G,
    ala: A,
}

impl<G: InteractionClient, A: OccurrenceClient + EnrichmentClient> App<G, A> {
    pub fn new(config: &ResolvedConfig, globi: G, ala: A) -> Self {
        Self {
            config: config.clone(),
            store: Store::new(config),
            globi,
            ala,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn fetch_interactions(
        &self,
        sink: &dyn ProgressSink,
    ) -> Result<InteractionFetchResult, PipelineError> {
        self.store.ensure_root()?;
        InteractionFetcher::new(&self.globi, &self.config.interactions).run(&self.store, sink)
    }

    pub fn canonicalize(&self, sink: &dyn ProgressSink) -> Result<CanonicalizeStats, PipelineError> {
        timed(sink, "Canonicalize", "interaction labels", || {
            run_canonicalize(&self.store)
        })
    }

    pub fn resolve(&self, sink: &dyn ProgressSink) -> Result<ResolveResult, PipelineError> {
        timed(sink, "Resolve", "checklist and enrichment joins", || {
            run_resolve(&self.store)
        })
    }

    pub fn fetch_enrichment(&self, sink: &dyn ProgressSink) -> Result<EnrichmentResult, PipelineError> {
        self.store.ensure_root()?;
        EnrichmentFetcher::new(&self.ala, &self.config.enrichment).run(&self.store, sink)
    }

    pub fn fetch_occurrences(
        &self,
        sink: &dyn ProgressSink,
    ) -> Result<OccurrenceFetchResult, PipelineError> {
        self.store.ensure_root()?;
        OccurrenceAggregator::new(&self.ala, &self.config.occurrences).run(&self.store, sink)
    }

    pub fn clean_occurrences(&self, sink: &dyn ProgressSink) -> Result<CleanResult, PipelineError> {
        timed(sink, "Clean", "occurrence provenance columns", || {
            run_clean(&self.store)
        })
    }

    pub fn sync(&self, sink: &dyn ProgressSink) -> Result<SyncResult, PipelineError> {
        timed(sink, "Sync", "species, relationship and occurrence tables", || {
            run_sync(&self.store)
        })
    }

    pub fn companions(&self, sink: &dyn ProgressSink) -> Result<CompanionResult, PipelineError> {
        timed(sink, "Load", "companion planting relations", || {
            run_companions(&self.store)
        })
    }

    /// Offline stages in dependency order.
    pub fn run(&self, sink: &dyn ProgressSink) -> Result<RunResult, PipelineError> {
        Ok(RunResult {
            canonicalize: self.canonicalize(sink)?,
            resolve: self.resolve(sink)?,
            sync: self.sync(sink)?,
        })
    }
}

fn timed<T, F>(sink: &dyn ProgressSink, phase: &str, what: &str, stage: F) -> Result<T, PipelineError>
where
    F: FnOnce() -> Result<T, PipelineError>,
{
    let started = Instant::now();
    sink.event(ProgressEvent {
        message: format!("phase={phase}; {what}"),
        elapsed: None,
    });
    let value = stage()?;
    sink.event(ProgressEvent {
        message: format!("phase=Done; {what}"),
        elapsed: Some(started.elapsed()),
    });
    Ok(value)
}
