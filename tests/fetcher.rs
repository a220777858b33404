use std::fs;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;

use vigrow_pipeline::config::{Config, ConfigLoader, InteractionSettings};
use vigrow_pipeline::domain::{InteractionType, RawInteraction};
use vigrow_pipeline::error::PipelineError;
use vigrow_pipeline::fetcher::{InteractionFetcher, read_organism_names};
use vigrow_pipeline::globi::{InteractionClient, InteractionRow, PageRequest, PageStrategy};
use vigrow_pipeline::output::JsonOutput;
use vigrow_pipeline::store::Store;

fn settings(page_limit: usize) -> InteractionSettings {
    let mut config = Config::default();
    config.interactions.page_limit = page_limit;
    config.interactions.retry_attempts = 2;
    config.interactions.retry_delay_ms = 0;
    config.interactions.page_delay_ms = 0;
    config.interactions.organism_delay_ms = 0;
    ConfigLoader::resolve_config(config).unwrap().interactions
}

fn row(source: &str, target: &str, label: &str) -> InteractionRow {
    InteractionRow {
        source_taxon_name: source.to_string(),
        target_taxon_name: target.to_string(),
        interaction_type: label.to_string(),
    }
}

/// Scripted service: `eatenBy` answers only on the plain CSV strategy and
/// spans two pages, `pollinatedBy` only has a distinct list, everything else
/// is empty.
#[derive(Default)]
struct MockGlobi {
    pages: Mutex<Vec<(PageStrategy, InteractionType, usize)>>,
    distinct: Mutex<Vec<InteractionType>>,
}

impl MockGlobi {
    fn page_calls(&self) -> usize {
        self.pages.lock().unwrap().len()
    }
}

impl InteractionClient for MockGlobi {
    fn resolve_name(&self, name: &str) -> Result<Option<String>, PipelineError> {
        match name {
            "acacia dealbata" => Ok(Some("Acacia dealbata".to_string())),
            _ => Ok(None),
        }
    }

    fn fetch_page(
        &self,
        request: &PageRequest<'_>,
        strategy: PageStrategy,
    ) -> Result<Vec<InteractionRow>, PipelineError> {
        self.pages
            .lock()
            .unwrap()
            .push((strategy, request.interaction, request.offset));
        if request.organism != "Acacia dealbata" || request.interaction != InteractionType::EatenBy
        {
            return Ok(Vec::new());
        }
        match (strategy, request.offset) {
            (PageStrategy::CsvWithFields, _) => {
                Err(PipelineError::GlobiStatus {
                    status: 500,
                    message: "unavailable".to_string(),
                })
            }
            (PageStrategy::Csv, 0) => Ok(vec![
                row("Acacia dealbata", "Psyllid sp", "eatenBy"),
                row("Trichosurus vulpecula", "Acacia dealbata", ""),
            ]),
            (PageStrategy::Csv, 2) => Ok(vec![row("Acacia dealbata", "psyllid sp", "eatenBy")]),
            _ => Ok(Vec::new()),
        }
    }

    fn fetch_distinct(
        &self,
        organism: &str,
        interaction: InteractionType,
    ) -> Result<Vec<String>, PipelineError> {
        self.distinct.lock().unwrap().push(interaction);
        if organism == "Acacia dealbata" && interaction == InteractionType::PollinatedBy {
            return Ok(vec!["Apis mellifera".to_string(), " ".to_string()]);
        }
        Ok(Vec::new())
    }
}

fn raw(animal: &str, label: &str) -> RawInteraction {
    RawInteraction {
        source_organism_name: "Acacia dealbata".to_string(),
        counterpart_name: animal.to_string(),
        interaction_type_raw: label.to_string(),
    }
}

#[test]
fn fetch_organism_uses_strategies_and_distinct_fallback() {
    let client = MockGlobi::default();
    let settings = settings(2);
    let fetcher = InteractionFetcher::new(&client, &settings);

    let fetched = fetcher.fetch_organism("acacia dealbata");
    assert_eq!(fetched.resolved_name, "Acacia dealbata");
    assert_eq!(
        fetched.rows,
        vec![
            raw("Psyllid sp", "eatenBy"),
            raw("Trichosurus vulpecula", "eatenBy"),
            raw("Apis mellifera", "pollinatedBy"),
        ]
    );
    assert_eq!(fetched.exhausted_pages, 9);
    assert_eq!(fetched.distinct_lookups, 9);

    let pages = client.pages.lock().unwrap();
    let failed_first_page = pages
        .iter()
        .filter(|call| **call == (PageStrategy::CsvWithFields, InteractionType::EatenBy, 0))
        .count();
    assert_eq!(failed_first_page, 2);
    assert!(
        !pages
            .iter()
            .any(|call| call.1 == InteractionType::EatenBy && call.0 == PageStrategy::JsonV2)
    );
    assert!(
        !client
            .distinct
            .lock()
            .unwrap()
            .contains(&InteractionType::EatenBy)
    );
}

#[test]
fn organism_names_are_trimmed_and_unique() {
    let temp = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(temp.path().join("names.csv")).unwrap();
    fs::write(
        &path,
        "scientific_name,common_name\n Acacia dealbata ,Silver wattle\n,\nAcacia dealbata,\nBanksia marginata,\n",
    )
    .unwrap();
    assert_eq!(
        read_organism_names(&path).unwrap(),
        vec!["Acacia dealbata", "Banksia marginata"]
    );
}

#[test]
fn run_resumes_from_checkpoint() {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let store = Store::new_with_root(root);
    fs::write(
        store.scientific_names_path(),
        "scientific_name\nacacia dealbata\nBanksia marginata\nacacia dealbata\n",
    )
    .unwrap();

    let client = MockGlobi::default();
    let settings = settings(2);
    let fetcher = InteractionFetcher::new(&client, &settings);

    let first = fetcher.run(&store, &JsonOutput).unwrap();
    assert_eq!(first.organisms, 2);
    assert_eq!(first.completed, 2);
    assert_eq!(first.skipped, 0);
    assert_eq!(first.rows_written, 3);

    let calls = client.page_calls();
    let second = fetcher.run(&store, &JsonOutput).unwrap();
    assert_eq!(second.completed, 0);
    assert_eq!(second.skipped, 2);
    assert_eq!(client.page_calls(), calls);

    let rows: Vec<RawInteraction> = Store::read_rows(&store.raw_interactions_path()).unwrap();
    assert_eq!(rows.len(), 3);
    assert!(
        Store::checkpoint_path(&store.raw_interactions_path())
            .as_std_path()
            .is_file()
    );
}

#[test]
fn legacy_output_under_resolved_name_counts_as_done() {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let store = Store::new_with_root(root);
    fs::write(
        store.scientific_names_path(),
        "scientific_name\nacacia dealbata\nBanksia marginata\n",
    )
    .unwrap();
    fs::write(
        store.raw_interactions_path(),
        "plant_scientific_name,animal_taxon_name,interaction_type_raw\n\
         Acacia dealbata,Psyllid sp,eatenBy\n",
    )
    .unwrap();

    let client = MockGlobi::default();
    let settings = settings(2);
    let fetcher = InteractionFetcher::new(&client, &settings);

    let first = fetcher.run(&store, &JsonOutput).unwrap();
    assert_eq!(first.skipped, 1);
    assert_eq!(first.completed, 1);
    assert_eq!(first.rows_written, 0);

    let second = fetcher.run(&store, &JsonOutput).unwrap();
    assert_eq!(second.skipped, 2);
    assert_eq!(second.completed, 0);

    let rows: Vec<RawInteraction> = Store::read_rows(&store.raw_interactions_path()).unwrap();
    assert_eq!(rows, vec![raw("Psyllid sp", "eatenBy")]);
}

#[test]
fn page_delay_follows_every_request() {
    let client = MockGlobi::default();
    let mut settings = settings(1024);
    settings.page_delay = Duration::from_millis(5);
    let fetcher = InteractionFetcher::new(&client, &settings);

    let started = Instant::now();
    let fetched = fetcher.fetch_organism("Banksia marginata");
    assert!(fetched.rows.is_empty());
    assert_eq!(fetched.exhausted_pages, InteractionType::ALL.len());
    assert!(started.elapsed() >= settings.page_delay * InteractionType::ALL.len() as u32);
}
