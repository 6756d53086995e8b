mod common;

use common::{png_bytes, write_standard_models, TinyResNet};
use medcascade::inference::{
    ArtifactNaming, CascadeEngine, CascadeError, Catalog, Domain, ModelRegistry, ModelRole, Preprocessor,
};

#[test]
fn loads_router_and_every_domain_model() {
    let dir = tempfile::tempdir().unwrap();
    write_standard_models(dir.path(), Domain::ChestXray, 1);

    let registry = ModelRegistry::load(dir.path(), Catalog::standard(), &ArtifactNaming::default()).unwrap();
    assert_eq!(registry.router().num_classes(), 5);

    let details = registry.details();
    assert_eq!(details.len(), 6);
    assert_eq!(details[0].role, ModelRole::Router);
    assert!(details[0].path.as_ref().unwrap().ends_with("General_Model.gguf"));
    for (detail, domain) in details[1..].iter().zip(Domain::ALL) {
        assert_eq!(detail.domain, Some(domain));
        assert_eq!(detail.architecture, "resnet");
        assert!(detail.tensor_count.unwrap() > 0);
        assert_eq!(detail.labels.len(), domain.standard_classes().len());
    }
}

#[test]
fn every_router_index_resolves_to_a_loaded_model() {
    let dir = tempfile::tempdir().unwrap();
    write_standard_models(dir.path(), Domain::BloodCancer, 0);
    let registry = ModelRegistry::load(dir.path(), Catalog::standard(), &ArtifactNaming::default()).unwrap();

    for index in 0..registry.catalog().len() {
        let domain = registry.domain_at(index).unwrap();
        let model = registry.for_domain(domain).unwrap();
        assert_eq!(model.num_classes(), registry.catalog().classes(domain).unwrap().len());
    }
    assert!(matches!(registry.domain_at(5), Err(CascadeError::UnknownDomain(_))));
}

#[test]
fn three_class_brain_model_fails_at_load() {
    let dir = tempfile::tempdir().unwrap();
    write_standard_models(dir.path(), Domain::BrainMri, 0);
    let brain = dir.path().join("Brain_MRI_Model.gguf");
    TinyResNet::new(3).write(&brain);

    match ModelRegistry::load(dir.path(), Catalog::standard(), &ArtifactNaming::default()) {
        Err(CascadeError::ModelLoad { path, .. }) => assert_eq!(path, brain),
        other => panic!("expected ModelLoad, got {:?}", other.err()),
    }
}

#[test]
fn absurd_tensor_dimension_fails_at_load() {
    let dir = tempfile::tempdir().unwrap();
    write_standard_models(dir.path(), Domain::BreastCancer, 0);
    let breast = dir.path().join("Breast_Cancer_Model.gguf");

    let mut bytes = std::fs::read(&breast).unwrap();
    let name_at = bytes.windows(7).position(|w| w == b"fc.bias").unwrap();
    let dim_at = name_at + 7 + 4;
    bytes[dim_at..dim_at + 8].copy_from_slice(&(1u64 << 62).to_le_bytes());
    std::fs::write(&breast, &bytes).unwrap();

    match ModelRegistry::load(dir.path(), Catalog::standard(), &ArtifactNaming::default()) {
        Err(CascadeError::ModelLoad { path, .. }) => assert_eq!(path, breast),
        other => panic!("expected ModelLoad, got {:?}", other.err()),
    }
}

#[test]
fn missing_domain_artifact_fails_at_load() {
    let dir = tempfile::tempdir().unwrap();
    write_standard_models(dir.path(), Domain::BrainMri, 0);
    std::fs::remove_file(dir.path().join("Chest_Xray_Model.gguf")).unwrap();

    let result = ModelRegistry::load(dir.path(), Catalog::standard(), &ArtifactNaming::default());
    assert!(matches!(result, Err(CascadeError::ModelLoad { .. })));
}

#[test]
fn router_width_mismatch_fails_at_load() {
    let dir = tempfile::tempdir().unwrap();
    write_standard_models(dir.path(), Domain::BrainMri, 0);
    TinyResNet::new(4).write(&dir.path().join("General_Model.gguf"));

    let result = ModelRegistry::load(dir.path(), Catalog::standard(), &ArtifactNaming::default());
    assert!(matches!(result, Err(CascadeError::ModelLoad { .. })));
}

#[test]
fn custom_artifact_names_are_honoured() {
    let dir = tempfile::tempdir().unwrap();
    let naming = ArtifactNaming {
        router_file: "router.gguf".to_string(),
        domain_suffix: ".gguf".to_string(),
    };
    TinyResNet::favouring(5, 0).write(&dir.path().join("router.gguf"));
    for domain in Domain::ALL {
        TinyResNet::favouring(domain.standard_classes().len(), 0).write(&dir.path().join(naming.domain_file(domain)));
    }

    let registry = ModelRegistry::load(dir.path(), Catalog::standard(), &naming).unwrap();
    assert_eq!(registry.details().len(), 6);
}

#[test]
fn artifacts_drive_the_full_cascade() {
    let dir = tempfile::tempdir().unwrap();
    write_standard_models(dir.path(), Domain::BrainMri, 3);
    let registry = ModelRegistry::load(dir.path(), Catalog::standard(), &ArtifactNaming::default()).unwrap();
    let engine = CascadeEngine::new(registry, Preprocessor::new(64, 0.5, 0.5, 1 << 20));

    let result = engine.classify(&png_bytes(80, 60)).unwrap();
    assert_eq!(result.domain, Domain::BrainMri);
    assert_eq!(result.domain_index, 2);
    assert_eq!(result.class_index, 3);
    assert_eq!(result.class_name, "pituitary_tumor");
}
