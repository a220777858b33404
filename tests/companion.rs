use std::fs;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use vigrow_pipeline::companion::{CompanionIndex, run_companions};
use vigrow_pipeline::domain::{CompanionRelation, Relation};
use vigrow_pipeline::error::PipelineError;
use vigrow_pipeline::store::Store;

fn write_companions(content: &str) -> (tempfile::TempDir, Store) {
    let temp = tempfile::tempdir().unwrap();
    let store = Store::new_with_root(Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap());
    fs::write(store.companions_path(), content).unwrap();
    (temp, store)
}

const SAMPLE: &str = "plant;neighbour;good_or_bad;why\n\
Tomato;Basil;good;repels thrips\n\
All;Marigold;good;deters nematodes\n\
Tomato;basil;bad;\n\
Basil;Tomato;Good;\n";

#[test]
fn wildcard_rows_apply_to_every_other_plant() {
    let (_temp, store) = write_companions(SAMPLE);
    let index = CompanionIndex::load(&store.companions_path()).unwrap();
    assert_eq!(index.relations().len(), 3);
    assert_eq!(index.duplicates(), 1);

    let tomato = index
        .relations_for("tomato")
        .into_iter()
        .map(|relation| relation.neighbour.as_str())
        .collect::<Vec<_>>();
    assert_eq!(tomato, vec!["Basil", "Marigold"]);
    assert!(index.relations_for("Marigold").is_empty());
    assert_eq!(index.plants(), vec!["Basil", "Marigold", "Tomato"]);

    let basil = index.relations_for("Basil");
    assert_eq!(basil[0].relation, Relation::Good);
    assert_eq!(basil[0].reason, None);
}

#[test]
fn invalid_relation_reports_its_line() {
    let (_temp, store) =
        write_companions("plant,neighbour,good_or_bad,why\nTomato,Basil,good,\nTomato,Fennel,terrible,\n");
    let err = CompanionIndex::load(&store.companions_path()).unwrap_err();
    assert_matches!(
        err,
        PipelineError::InvalidCompanionRow { line: 3, ref message, .. } if message.contains("terrible")
    );
}

#[test]
fn empty_neighbour_is_fatal() {
    let (_temp, store) = write_companions("plant\tneighbour\tgood_or_bad\twhy\nTomato\t \tgood\t\n");
    let err = CompanionIndex::load(&store.companions_path()).unwrap_err();
    assert_matches!(err, PipelineError::InvalidCompanionRow { line: 2, .. });
}

#[test]
fn missing_why_column_is_fatal() {
    let (_temp, store) = write_companions("plant,neighbour,good_or_bad\nTomato,Basil,good\n");
    let err = CompanionIndex::load(&store.companions_path()).unwrap_err();
    assert_matches!(err, PipelineError::MissingColumn { field, .. } if field == "why");
}

#[test]
fn run_companions_writes_normalized_table() {
    let (_temp, store) = write_companions(SAMPLE);
    let result = run_companions(&store).unwrap();
    assert_eq!(result.rows_written, 3);
    assert_eq!(result.plants, 3);

    let rows: Vec<CompanionRelation> = Store::read_rows(&store.companion_relations_path()).unwrap();
    assert_eq!(rows[0].plant, "Tomato");
    assert_eq!(rows[0].relation, Relation::Good);
    assert_eq!(rows[0].reason.as_deref(), Some("repels thrips"));
    assert!(rows[1].is_wildcard());
}
