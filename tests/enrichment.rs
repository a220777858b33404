use std::fs;
use std::sync::Mutex;

use camino::Utf8PathBuf;

use vigrow_pipeline::ala::EnrichmentClient;
use vigrow_pipeline::config::{Config, ConfigLoader, EnrichmentSettings};
use vigrow_pipeline::domain::EnrichmentRecord;
use vigrow_pipeline::enrichment::{EnrichmentFetcher, documented_animals};
use vigrow_pipeline::error::PipelineError;
use vigrow_pipeline::output::JsonOutput;
use vigrow_pipeline::store::Store;

fn settings() -> EnrichmentSettings {
    let mut config = Config::default();
    config.enrichment.backoff_ms = 0;
    config.enrichment.rate_limit_ms = 0;
    config.enrichment.summary_max_chars = 40;
    ConfigLoader::resolve_config(config).unwrap().enrichment
}

/// Images only answer the bare quoted query; profiles exist for the honey
/// bee; the wasp only has an encyclopedia extract.
#[derive(Default)]
struct MockAla {
    image_queries: Mutex<Vec<String>>,
}

impl EnrichmentClient for MockAla {
    fn image_url(&self, query: &str) -> Result<Option<String>, PipelineError> {
        self.image_queries.lock().unwrap().push(query.to_string());
        if query == "\"Apis mellifera\"" {
            return Ok(Some("https://images.example/apis.jpg".to_string()));
        }
        if query.starts_with("taxon_name:") {
            return Err(PipelineError::AlaHttp("timeout".to_string()));
        }
        Ok(None)
    }

    fn species_guid(&self, name: &str) -> Result<Option<String>, PipelineError> {
        Ok((name == "Apis mellifera").then(|| "urn:lsid:apis".to_string()))
    }

    fn species_description(&self, guid: &str) -> Result<Option<String>, PipelineError> {
        assert_eq!(guid, "urn:lsid:apis");
        Ok(Some(
            "The western honey bee is the most common bee.  It lives in large colonies worldwide."
                .to_string(),
        ))
    }

    fn wikipedia_extract(&self, name: &str) -> Result<Option<String>, PipelineError> {
        Ok((name == "Vespula germanica").then(|| "The European wasp.".to_string()))
    }
}

fn store_with_inputs(temp: &tempfile::TempDir) -> Store {
    let store =
        Store::new_with_root(Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap());
    fs::write(
        store.canonical_interactions_path(),
        "plant_scientific_name,animal_taxon_name,interaction_type\n\
         Acacia dealbata,apis mellifera,visits\n\
         Acacia dealbata,Vespula germanica,eatenBy\n\
         Banksia marginata,Apis mellifera,pollinatedBy\n\
         Banksia marginata,Unlisted moth,eatenBy\n\
         Banksia marginata,Trigona carbonaria,visits\n",
    )
    .unwrap();
    fs::write(
        store.checklist_path(),
        "Species Name,Species,Kingdom\n\
         Apis mellifera,urn:apis,Animalia\n\
         Vespula germanica,urn:wasp,Animalia\n\
         Trigona carbonaria,urn:trigona,Animalia\n",
    )
    .unwrap();
    store
}

#[test]
fn documented_animals_use_checklist_spelling() {
    let temp = tempfile::tempdir().unwrap();
    let store = store_with_inputs(&temp);
    assert_eq!(
        documented_animals(&store).unwrap(),
        vec!["Apis mellifera", "Vespula germanica", "Trigona carbonaria"]
    );
}

#[test]
fn run_writes_one_row_per_animal_and_resumes() {
    let temp = tempfile::tempdir().unwrap();
    let store = store_with_inputs(&temp);
    let client = MockAla::default();
    let settings = settings();
    let fetcher = EnrichmentFetcher::new(&client, &settings);

    let result = fetcher.run(&store, &JsonOutput).unwrap();
    assert_eq!(result.animals, 3);
    assert_eq!(result.completed, 3);
    assert_eq!(result.images_found, 1);
    assert_eq!(result.summaries_found, 2);

    let rows: Vec<EnrichmentRecord> = Store::read_rows(&store.enrichment_path()).unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].image_url, "https://images.example/apis.jpg");
    assert_eq!(rows[0].summary, "The western honey bee is the most common…");
    assert_eq!(rows[1].image_url, "NA");
    assert_eq!(rows[1].summary, "The European wasp.");
    assert_eq!(rows[2].summary, "NA");

    let queries = client.image_queries.lock().unwrap().len();
    let again = fetcher.run(&store, &JsonOutput).unwrap();
    assert_eq!(again.skipped, 3);
    assert_eq!(again.completed, 0);
    assert_eq!(client.image_queries.lock().unwrap().len(), queries);
}
