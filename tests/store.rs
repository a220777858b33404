use std::fs;
use std::io::Write;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use flate2::Compression;
use flate2::write::GzEncoder;

use vigrow_pipeline::domain::{ENRICHMENT_HEADERS, EnrichmentRecord};
use vigrow_pipeline::error::PipelineError;
use vigrow_pipeline::store::{AppendTable, Store, first_column_values};

fn temp_root() -> (tempfile::TempDir, Utf8PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    (temp, root)
}

fn record(name: &str) -> EnrichmentRecord {
    EnrichmentRecord {
        animal_taxon_name: name.to_string(),
        image_url: "NA".to_string(),
        summary: "NA".to_string(),
    }
}

#[test]
fn layout_paths() {
    let store = Store::new_with_root(Utf8PathBuf::from("data"));
    assert_eq!(store.species_path(), "data/species_information_dataset.csv");
    assert_eq!(store.raw_interactions_path(), "data/plant_animal_interactions.csv");
    assert_eq!(
        Store::checkpoint_path(&store.occurrences_path()),
        "data/species_occurrences.csv.done"
    );
}

#[test]
fn missing_input_is_reported_by_path() {
    let (_temp, root) = temp_root();
    let store = Store::new_with_root(root);
    let err = Store::read_table(&store.checklist_path()).unwrap_err();
    assert_matches!(err, PipelineError::MissingInput(path) if path.ends_with("checklist.csv"));
}

#[test]
fn reads_gzip_tables_and_skips_blank_rows() {
    let (_temp, root) = temp_root();
    let path = root.join("checklist.csv.gz");
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(b"Species Name,Kingdom\nApis mellifera,Animalia\n,\nVespula germanica,Animalia\n")
        .unwrap();
    fs::write(&path, encoder.finish().unwrap()).unwrap();

    let table = Store::read_table(&path).unwrap();
    assert_eq!(table.name, "checklist.csv.gz");
    assert_eq!(table.len(), 2);
    assert_eq!(&table.rows[1][0], "Vespula germanica");
}

#[test]
fn append_table_writes_header_once() {
    let (_temp, root) = temp_root();
    let path = root.join("nested").join("images.csv");

    let mut writer = AppendTable::open(&path, &ENRICHMENT_HEADERS).unwrap();
    writer.append(&[record("Apis mellifera")]).unwrap();
    drop(writer);
    let mut writer = AppendTable::open(&path, &ENRICHMENT_HEADERS).unwrap();
    writer.append(&[record("Vespula germanica")]).unwrap();
    assert_eq!(writer.rows_written(), 1);
    drop(writer);

    let rows: Vec<EnrichmentRecord> = Store::read_rows(&path).unwrap();
    assert_eq!(rows, vec![record("Apis mellifera"), record("Vespula germanica")]);
    assert_eq!(
        first_column_values(&path).unwrap(),
        vec!["Apis mellifera", "Vespula germanica"]
    );
}

#[test]
fn atomic_write_replaces_existing_file() {
    let (_temp, root) = temp_root();
    let path = root.join("images.csv");
    fs::write(&path, "stale content\n").unwrap();

    let written =
        Store::write_rows_atomic(&path, &ENRICHMENT_HEADERS, &[record("Apis mellifera")]).unwrap();
    assert_eq!(written, 1);
    let content = fs::read_to_string(&path).unwrap();
    assert_eq!(content, "animal_taxon_name,image_url,summary\nApis mellifera,NA,NA\n");
    assert!(first_column_values(&root.join("absent.csv")).unwrap().is_empty());
}

#[test]
fn append_after_torn_row_starts_a_fresh_line() {
    let (_temp, root) = temp_root();
    let path = root.join("images.csv");
    fs::write(&path, "animal_taxon_name,image_url,summary\nApis mellifera,NA,NA\nVespula ger").unwrap();

    let mut writer = AppendTable::open(&path, &ENRICHMENT_HEADERS).unwrap();
    writer.append(&[record("Trigona carbonaria")]).unwrap();
    drop(writer);

    let content = fs::read_to_string(&path).unwrap();
    assert_eq!(
        content,
        "animal_taxon_name,image_url,summary\nApis mellifera,NA,NA\nTrigona carbonaria,NA,NA\n"
    );
}

#[test]
fn torn_header_is_rewritten() {
    let (_temp, root) = temp_root();
    let path = root.join("images.csv");
    fs::write(&path, "animal_tax").unwrap();

    let mut writer = AppendTable::open(&path, &ENRICHMENT_HEADERS).unwrap();
    writer.append(&[record("Apis mellifera")]).unwrap();
    drop(writer);

    let rows: Vec<EnrichmentRecord> = Store::read_rows(&path).unwrap();
    assert_eq!(rows, vec![record("Apis mellifera")]);
}
