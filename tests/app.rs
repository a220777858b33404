use std::fs;
use std::sync::Mutex;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use vigrow_pipeline::ala::{EnrichmentClient, OccurrenceClient, OccurrencePage};
use vigrow_pipeline::app::{App, ProgressEvent, ProgressSink, StageReport};
use vigrow_pipeline::config::{Config, ConfigLoader, ResolvedConfig};
use vigrow_pipeline::domain::{CanonicalInteraction, InteractionType, SpeciesRecord};
use vigrow_pipeline::error::PipelineError;
use vigrow_pipeline::globi::{InteractionClient, InteractionRow, PageRequest, PageStrategy};
use vigrow_pipeline::output::JsonOutput;
use vigrow_pipeline::store::Store;

#[derive(Default)]
struct MockGlobi {
    calls: Mutex<usize>,
}

impl InteractionClient for MockGlobi {
    fn resolve_name(&self, _name: &str) -> Result<Option<String>, PipelineError> {
        Ok(None)
    }

    fn fetch_page(
        &self,
        request: &PageRequest<'_>,
        _strategy: PageStrategy,
    ) -> Result<Vec<InteractionRow>, PipelineError> {
        *self.calls.lock().unwrap() += 1;
        if request.interaction == InteractionType::FlowersVisitedBy && request.offset == 0 {
            return Ok(vec![InteractionRow {
                source_taxon_name: "Apis mellifera".to_string(),
                target_taxon_name: request.organism.to_string(),
                interaction_type: "flowersVisitedBy".to_string(),
            }]);
        }
        Ok(Vec::new())
    }

    fn fetch_distinct(
        &self,
        _organism: &str,
        _interaction: InteractionType,
    ) -> Result<Vec<String>, PipelineError> {
        Ok(Vec::new())
    }
}

struct MockAla;

impl OccurrenceClient for MockAla {
    fn search_occurrences(
        &self,
        _species: &str,
        _start: usize,
        _page_size: usize,
    ) -> Result<OccurrencePage, PipelineError> {
        Err(PipelineError::AlaHttp("not implemented".to_string()))
    }
}

impl EnrichmentClient for MockAla {
    fn image_url(&self, _query: &str) -> Result<Option<String>, PipelineError> {
        Ok(None)
    }

    fn species_guid(&self, _name: &str) -> Result<Option<String>, PipelineError> {
        Ok(None)
    }

    fn species_description(&self, _guid: &str) -> Result<Option<String>, PipelineError> {
        Ok(None)
    }

    fn wikipedia_extract(&self, _name: &str) -> Result<Option<String>, PipelineError> {
        Ok(None)
    }
}

#[derive(Default)]
struct RecordingSink {
    messages: Mutex<Vec<String>>,
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.messages.lock().unwrap().push(event.message);
    }
}

fn test_config(temp: &tempfile::TempDir) -> ResolvedConfig {
    let mut config = Config::default();
    config.interactions.retry_attempts = 1;
    config.interactions.retry_delay_ms = 0;
    config.interactions.page_delay_ms = 0;
    config.interactions.organism_delay_ms = 0;
    ConfigLoader::resolve_config(config)
        .unwrap()
        .with_data_dir(Utf8PathBuf::from_path_buf(temp.path().join("data")).unwrap())
}

fn write_offline_inputs(store: &Store) {
    fs::create_dir_all(store.root()).unwrap();
    fs::write(
        store.raw_interactions_path(),
        "plant_scientific_name,animal_taxon_name,interaction_type_raw\n\
         Acacia dealbata,Apis mellifera,flowersVisitedBy\n\
         Acacia dealbata,Eucalyptus viminalis,hasHost\n\
         Acacia dealbata,Vespula germanica,eatenBy\n\
         Acacia dealbata,Acacia dealbata,eatenBy\n",
    )
    .unwrap();
    fs::write(
        store.checklist_path(),
        "Species Name,Species,Kingdom,Vernacular Name,Number of records,Victoria : Conservation Status\n\
         Apis mellifera,urn:apis,Animalia,European Honey Bee,\"12,345\",\n\
         Eucalyptus viminalis,urn:euc,Plantae,Manna Gum,800,\n\
         Vespula germanica,urn:wasp,Animalia,European Wasp,90,\n",
    )
    .unwrap();
    fs::write(
        store.enrichment_path(),
        "animal_taxon_name,image_url,summary\n\
         Apis mellifera,https://images.example/apis.jpg,A bee.\n\
         Eucalyptus viminalis,https://images.example/euc.jpg,A gum.\n\
         Vespula germanica,NA,A wasp.\n",
    )
    .unwrap();
}

#[test]
fn run_builds_synchronized_tables() {
    let temp = tempfile::tempdir().unwrap();
    let config = test_config(&temp);
    let app = App::new(&config, MockGlobi::default(), MockAla);
    write_offline_inputs(app.store());

    let sink = RecordingSink::default();
    let result = app.run(&sink).unwrap();
    assert_eq!(result.canonicalize.output_rows, 3);
    assert_eq!(result.canonicalize.self_loops, 1);
    assert_eq!(result.resolve.species_written, 1);
    assert_eq!(result.resolve.relationships_written, 3);
    assert_eq!(result.sync.species_removed, 0);
    assert_eq!(result.sync.relationships_removed, 2);
    assert_eq!(result.sync.relationships_kept, 1);
    assert_eq!(result.sync.occurrences_kept, None);

    let species: Vec<SpeciesRecord> = Store::read_rows(&app.store().species_path()).unwrap();
    assert_eq!(species.len(), 1);
    assert_eq!(species[0].animal_taxon_name, "Apis mellifera");
    assert_eq!(species[0].checklist_id, "urn:apis");
    assert_eq!(species[0].number_of_records, Some(12_345));
    assert_eq!(species[0].summary, "A bee.");

    let relationships: Vec<CanonicalInteraction> =
        Store::read_rows(&app.store().relationships_path()).unwrap();
    assert_eq!(relationships.len(), 1);
    assert_eq!(relationships[0].interaction_type, "visits");

    let messages = sink.messages.lock().unwrap();
    assert!(messages.iter().any(|message| message.starts_with("phase=Resolve;")));
    assert!(messages.iter().all(|message| message.starts_with("phase=")));
}

#[test]
fn fetch_then_canonicalize() {
    let temp = tempfile::tempdir().unwrap();
    let config = test_config(&temp);
    let app = App::new(&config, MockGlobi::default(), MockAla);
    fs::create_dir_all(app.store().root()).unwrap();
    fs::write(
        app.store().scientific_names_path(),
        "scientific_name\nAcacia dealbata\n",
    )
    .unwrap();

    let fetched = app.fetch_interactions(&JsonOutput).unwrap();
    assert_eq!(fetched.completed, 1);
    assert_eq!(fetched.rows_written, 1);

    let stats = app.canonicalize(&JsonOutput).unwrap();
    assert_eq!(stats.output_rows, 1);
    let rows: Vec<CanonicalInteraction> =
        Store::read_rows(&app.store().canonical_interactions_path()).unwrap();
    assert_eq!(rows[0].animal_taxon_name, "Apis mellifera");
    assert_eq!(rows[0].interaction_type, "visits");
}

#[test]
fn resolve_requires_enrichment_table() {
    let temp = tempfile::tempdir().unwrap();
    let config = test_config(&temp);
    let app = App::new(&config, MockGlobi::default(), MockAla);
    write_offline_inputs(app.store());
    fs::remove_file(app.store().enrichment_path()).unwrap();

    app.canonicalize(&JsonOutput).unwrap();
    let err = app.resolve(&JsonOutput).unwrap_err();
    assert_matches!(err, PipelineError::MissingInput(path) if path.ends_with("ala_animal_images.csv"));
}

#[test]
fn reports_serialize_with_command_tag() {
    let temp = tempfile::tempdir().unwrap();
    let config = test_config(&temp);
    let app = App::new(&config, MockGlobi::default(), MockAla);
    write_offline_inputs(app.store());

    let report = StageReport::Canonicalize(app.canonicalize(&JsonOutput).unwrap());
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["command"], "canonicalize");
    assert_eq!(json["output_rows"], 3);
}
