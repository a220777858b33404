use std::collections::HashMap;

use vigrow_pipeline::checklist::{Checklist, ChecklistEntry, ChecklistStatus};
use vigrow_pipeline::domain::{CanonicalInteraction, EnrichmentRecord};
use vigrow_pipeline::resolver::{
    DropReason, RetentionFacts, index_enrichment, resolve, retention_verdict,
};

fn entry(name: &str, id: &str, kingdom: &str) -> ChecklistEntry {
    ChecklistEntry {
        name: name.to_string(),
        checklist_id: id.to_string(),
        kingdom: kingdom.to_string(),
        ..ChecklistEntry::default()
    }
}

fn with_status(mut entry: ChecklistEntry, status: ChecklistStatus) -> ChecklistEntry {
    entry.status = status;
    entry
}

fn interaction(animal: &str) -> CanonicalInteraction {
    CanonicalInteraction {
        plant_scientific_name: "Acacia dealbata".to_string(),
        animal_taxon_name: animal.to_string(),
        interaction_type: "visits".to_string(),
    }
}

fn image(name: &str, url: &str) -> EnrichmentRecord {
    EnrichmentRecord {
        animal_taxon_name: name.to_string(),
        image_url: url.to_string(),
        summary: format!("About {name}."),
    }
}

fn fixture() -> (Checklist, HashMap<String, EnrichmentRecord>) {
    let checklist = Checklist::from_entries(vec![
        entry("Apis mellifera", "urn:apis", "Animalia"),
        entry("Eucalyptus viminalis", "urn:euc", "Plantae"),
        with_status(
            entry("Lantana camara", "urn:lantana", "Plantae"),
            ChecklistStatus {
                weed_significance: "WoNS".to_string(),
                ..ChecklistStatus::default()
            },
        ),
        with_status(
            entry("Thylacinus cynocephalus", "urn:thylacine", "Animalia"),
            ChecklistStatus {
                conservation_status: "Regionally Extinct".to_string(),
                ..ChecklistStatus::default()
            },
        ),
        entry("Vespula germanica", "urn:wasp", "Animalia"),
    ]);
    let enrichment = index_enrichment(vec![
        image("Apis  mellifera", "https://images.example/apis.jpg"),
        image("Apis mellifera", "https://images.example/second.jpg"),
        image("Eucalyptus viminalis", "https://images.example/euc.jpg"),
        image("Lantana camara", "https://images.example/lantana.jpg"),
        image("Thylacinus cynocephalus", "https://images.example/thylacine.jpg"),
    ]);
    (checklist, enrichment)
}

#[test]
fn resolve_applies_retention_rule() {
    let (checklist, enrichment) = fixture();
    let interactions = vec![
        interaction("apis  mellifera"),
        interaction("Eucalyptus viminalis"),
        interaction("Lantana camara"),
        interaction("Thylacinus cynocephalus"),
        interaction("Vespula germanica"),
        interaction("Unknown beetle"),
        interaction("Apis mellifera"),
    ];

    let resolution = resolve(&interactions, &checklist, &enrichment);
    let kept = resolution
        .species
        .iter()
        .map(|record| record.animal_taxon_name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(kept, vec!["Apis mellifera", "Lantana camara"]);
    assert_eq!(
        resolution.species[0].image_url,
        "https://images.example/apis.jpg"
    );
    assert_eq!(resolution.species[1].weed_significance, "WoNS");

    let result = &resolution.result;
    assert_eq!(result.interaction_rows, 7);
    assert_eq!(result.distinct_animals, 6);
    assert_eq!(result.unmatched_animals, 1);
    assert_eq!(result.missing_enrichment, 1);
    assert_eq!(result.dropped.get(&DropReason::NoImage), Some(&1));
    assert_eq!(result.dropped.get(&DropReason::NonAnimalWithoutFlags), Some(&1));
    assert_eq!(result.dropped.get(&DropReason::Extinct), Some(&1));
}

#[test]
fn relationships_use_checklist_spelling() {
    let (checklist, enrichment) = fixture();
    let interactions = vec![interaction("apis  mellifera"), interaction("Unknown beetle")];
    let resolution = resolve(&interactions, &checklist, &enrichment);
    assert_eq!(resolution.relationships, vec![interaction("Apis mellifera")]);
    assert_eq!(resolution.result.relationships_written, 1);
}

#[test]
fn first_failing_check_is_reported() {
    let facts = RetentionFacts {
        image_url: "NA",
        kingdom: "Plantae",
        conservation_status: "Extinct",
        ..RetentionFacts::default()
    };
    assert_eq!(retention_verdict(facts), Some(DropReason::NoImage));

    let pest = RetentionFacts {
        image_url: "https://images.example/x.jpg",
        kingdom: "Fungi",
        notifiable_pest: "Yes",
        ..RetentionFacts::default()
    };
    assert_eq!(retention_verdict(pest), None);

    let threatened = RetentionFacts {
        image_url: "https://images.example/x.jpg",
        kingdom: "Animalia",
        threatened_status: "Extinct in the wild",
        ..RetentionFacts::default()
    };
    assert_eq!(retention_verdict(threatened), Some(DropReason::Extinct));
}

#[test]
fn checklist_prefers_best_documented_duplicate() {
    let mut sparse = entry("Apis mellifera", "urn:b", "Animalia");
    sparse.number_of_records = Some(10);
    let mut rich = entry("apis mellifera", "urn:c", "Animalia");
    rich.number_of_records = Some(500);
    let mut tied = entry("Apis mellifera", "urn:a", "Animalia");
    tied.number_of_records = Some(500);

    let checklist = Checklist::from_entries(vec![sparse, rich, tied]);
    assert_eq!(checklist.shared_names(), 2);
    let found = checklist.lookup(" APIS  mellifera ").unwrap();
    assert_eq!(found.checklist_id, "urn:a");
}
