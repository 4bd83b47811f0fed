use common::config::{OutputModuleConfig, Polarity, SelectEventsConfig};
use common::model::{
    BranchId, BranchType, EventId, EventRecord, PathStatus, Product, ProductCatalog,
    ProductDescriptor, TriggerResults,
};
use proptest::prelude::*;
use writer::testing::RecordingBackend;
use writer::{FileState, OutputModule, ProductSelection, ProductSelectorRules};

fn descriptor(class: &str, label: &str) -> ProductDescriptor {
    ProductDescriptor::new(BranchType::Event, class, label, "", "PROD")
}

fn commands(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn module_with(
    config: OutputModuleConfig,
    backend: RecordingBackend,
) -> OutputModule<RecordingBackend> {
    OutputModule::new("PROD", &config, backend).unwrap()
}

#[test]
fn keep_rule_after_drop_all_keeps_only_matching_product() {
    let a = descriptor("TypeA", "labelX");
    let b = descriptor("TypeB", "labelY");
    let (a_id, b_id) = (a.branch_id, b.branch_id);
    let catalog = ProductCatalog::try_from(vec![a, b]).unwrap();

    let config = OutputModuleConfig {
        output_commands: commands(&["drop *", "keep product:TypeA_labelX_*"]),
        ..OutputModuleConfig::default()
    };
    let mut module = module_with(config, RecordingBackend::new());
    module.begin_job(&catalog).unwrap();

    let kept = module.kept_products();
    assert_eq!(kept.len(), 1);
    assert!(kept.contains(BranchType::Event, a_id));
    assert!(!kept.contains(BranchType::Event, b_id));
    assert!(module.has_newly_dropped_branch()[BranchType::Event.index()]);
}

#[test]
fn event_limit_of_two_writes_two_of_three() {
    let tracks = descriptor("recoTracks", "tracks");
    let id = tracks.branch_id;
    let catalog = ProductCatalog::try_from(vec![tracks]).unwrap();

    let config = OutputModuleConfig {
        max_events: Some(2),
        ..OutputModuleConfig::default()
    };
    let mut module = module_with(config, RecordingBackend::new());
    module.begin_job(&catalog).unwrap();
    module.open_if_needed().unwrap();

    let results: Vec<bool> = (1..=3)
        .map(|n| {
            let event = EventRecord::new(EventId::new(1, 1, n))
                .with_product(id, Product::new(vec![0u8]));
            module.write_event(&event).unwrap()
        })
        .collect();

    assert_eq!(results, vec![true, true, false]);
    assert_eq!(module.remaining_events(), Some(0));
    assert_eq!(module.backend().written_events().len(), 2);
}

#[test]
fn only_named_path_outcome_is_consulted() {
    let catalog = ProductCatalog::try_from(vec![descriptor("recoTracks", "tracks")]).unwrap();
    let config = OutputModuleConfig {
        select_events: SelectEventsConfig {
            select_events: commands(&["pathA:HLT"]),
            process_all: false,
        },
        ..OutputModuleConfig::default()
    };
    let mut module = module_with(config, RecordingBackend::new());
    module.begin_job(&catalog).unwrap();
    module.open_if_needed().unwrap();

    let event = EventRecord::new(EventId::new(1, 1, 1)).with_trigger_results(
        TriggerResults::new("HLT")
            .with_path("pathA", PathStatus::Fail)
            .with_path("pathB", PathStatus::Pass),
    );
    assert!(!module.write_event(&event).unwrap());
    assert!(module.backend().written_events().is_empty());
}

#[test]
fn rotation_reopens_with_same_kept_products() {
    let catalog = ProductCatalog::try_from(vec![
        descriptor("recoTracks", "tracks"),
        descriptor("recoPhotons", "photons"),
    ])
    .unwrap();
    let config = OutputModuleConfig {
        output_commands: commands(&["keep *", "drop recoPhotons_*"]),
        ..OutputModuleConfig::default()
    };
    let mut module = module_with(config, RecordingBackend::rotating_every(2));
    module.begin_job(&catalog).unwrap();
    module.open_if_needed().unwrap();

    for n in 1..=2 {
        module
            .write_event(&EventRecord::new(EventId::new(1, 1, n)))
            .unwrap();
    }
    assert!(module.close_file_if_requested().unwrap());
    assert_eq!(module.file_state(), FileState::Closed);
    module.open_if_needed().unwrap();
    assert_eq!(module.file_state(), FileState::Open);
    module.end_job().unwrap();

    let closed = &module.backend().closed_files;
    assert_eq!(closed.len(), 2);
    assert_eq!(closed[0].kept_branches, closed[1].kept_branches);
    assert_eq!(
        closed[0].kept_branches[&BranchType::Event],
        vec!["recoTracks_tracks__PROD.".to_string()]
    );
}

#[test]
fn duplicate_output_selection_is_rejected_at_begin_job() {
    let input = descriptor("recoPhotons", "photons");
    let alias = descriptor("recoPhotons", "gedPhotons").alias_of(&input);
    let catalog = ProductCatalog::try_from(vec![input, alias]).unwrap();

    let mut module = module_with(OutputModuleConfig::default(), RecordingBackend::new());
    assert!(matches!(
        module.begin_job(&catalog),
        Err(writer::OutputError::Configuration(
            writer::ConfigurationError::DuplicateOutputSelection { .. }
        ))
    ));
}

fn arb_rule() -> impl Strategy<Value = String> {
    let verb = prop_oneof![Just("keep"), Just("drop")];
    let pattern = prop_oneof![
        Just("*".to_string()),
        Just("TypeA_*".to_string()),
        Just("*_labelY_*".to_string()),
        Just("Type?_label*".to_string()),
        Just("product:TypeB_labelY_*_PROD".to_string()),
    ];
    (verb, pattern).prop_map(|(v, p)| format!("{v} {p}"))
}

fn arb_trigger_results() -> impl Strategy<Value = Vec<TriggerResults>> {
    let status = prop_oneof![
        Just(PathStatus::Ready),
        Just(PathStatus::Pass),
        Just(PathStatus::Fail),
        Just(PathStatus::Exception),
    ];
    proptest::collection::vec(
        ("[A-Z]{2,4}", proptest::collection::vec(("path[A-C]", status), 0..4)),
        0..3,
    )
    .prop_map(|processes| {
        processes
            .into_iter()
            .map(|(process, paths)| {
                paths
                    .into_iter()
                    .fold(TriggerResults::new(process), |acc, (path, status)| {
                        acc.with_path(path, status)
                    })
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn selection_equals_last_matching_rule(rules in proptest::collection::vec(arb_rule(), 0..8)) {
        let descriptors = vec![
            descriptor("TypeA", "labelX"),
            descriptor("TypeB", "labelY"),
            descriptor("TypeC", "labelZ"),
        ];
        let compiled = ProductSelectorRules::new(&rules, Polarity::Drop).unwrap();
        let catalog = ProductCatalog::try_from(descriptors.clone()).unwrap();
        let selection = ProductSelection::compute(&compiled, &catalog).unwrap();

        for desc in &descriptors {
            let mut expected = false;
            for rule in &rules {
                let single = ProductSelectorRules::new(std::slice::from_ref(rule), Polarity::Drop).unwrap();
                if single.deciding_rule(desc).is_some() {
                    expected = rule.starts_with("keep");
                }
            }
            prop_assert_eq!(selection.is_kept(desc.branch_id), expected);
        }
    }

    #[test]
    fn want_all_accepts_any_trigger_results(results in arb_trigger_results()) {
        let catalog = ProductCatalog::try_from(vec![descriptor("recoTracks", "tracks")]).unwrap();
        let mut module = module_with(OutputModuleConfig::default(), RecordingBackend::new());
        prop_assert!(module.want_all_events());
        module.begin_job(&catalog).unwrap();
        module.open_if_needed().unwrap();

        let event = results
            .into_iter()
            .fold(EventRecord::new(EventId::new(1, 1, 1)), |acc, r| acc.with_trigger_results(r));
        prop_assert!(module.write_event(&event).unwrap());
    }

    #[test]
    fn remaining_count_never_underflows(limit in 0u64..6, events in 0u64..12) {
        let catalog = ProductCatalog::try_from(vec![descriptor("recoTracks", "tracks")]).unwrap();
        let config = OutputModuleConfig { max_events: Some(limit), ..OutputModuleConfig::default() };
        let mut module = module_with(config, RecordingBackend::new());
        module.begin_job(&catalog).unwrap();
        module.open_if_needed().unwrap();

        let mut written = 0;
        for n in 0..events {
            if module.write_event(&EventRecord::new(EventId::new(1, 1, n))).unwrap() {
                written += 1;
            }
        }
        prop_assert_eq!(written, limit.min(events));
        prop_assert_eq!(module.remaining_events(), Some(limit - written));
        prop_assert_eq!(module.limit_reached(), written == limit);
    }
}

#[test]
fn branch_ids_are_stable_across_catalogs() {
    let first = descriptor("recoTracks", "tracks");
    let second = descriptor("recoTracks", "tracks");
    assert_eq!(first.branch_id, second.branch_id);
    assert_eq!(first.branch_id, BranchId::from_branch_name("recoTracks_tracks__PROD."));
}
