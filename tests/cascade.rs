mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use common::{one_hot, png_bytes, synthetic_engine, Broken, Fixed};
use medcascade::inference::{
    CascadeError, Classification, Classifier, Domain, ExclusiveClassifier, ImageTensor, Result, Serialized,
};

fn brain_engine() -> medcascade::inference::CascadeEngine {
    let mut domains: BTreeMap<Domain, Box<dyn Classifier>> = BTreeMap::new();
    domains.insert(Domain::BrainMri, Box::new(Fixed(vec![0.0, 0.0, 0.0, 1.0])));
    synthetic_engine(Box::new(Fixed(vec![0.0, 0.0, 1.0, 0.0, 0.0])), domains)
}

#[test]
fn routes_to_brain_mri_and_picks_pituitary_tumor() {
    let engine = brain_engine();
    let result = engine.classify(&png_bytes(64, 64)).unwrap();
    assert_eq!(
        result,
        Classification {
            domain: Domain::BrainMri,
            domain_index: 2,
            class_index: 3,
            class_name: "pituitary_tumor".to_string(),
        }
    );

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(
        json,
        serde_json::json!({
            "domain": "Brain_MRI",
            "domain_index": 2,
            "class_index": 3,
            "class_name": "pituitary_tumor"
        })
    );
}

#[test]
fn router_tie_resolves_to_first_domain() {
    let engine = synthetic_engine(Box::new(Fixed(vec![0.0, 1.0, 0.0, 1.0, 0.0])), BTreeMap::new());
    let result = engine.classify(&png_bytes(16, 16)).unwrap();
    assert_eq!(result.domain, Domain::BoneFracture);
    assert_eq!(result.domain_index, 1);
    assert_eq!(result.class_name, "fractured");
}

#[test]
fn empty_bytes_are_a_decode_error() {
    let engine = brain_engine();
    let err = engine.classify(b"").unwrap_err();
    assert!(matches!(err, CascadeError::Decode(_)));
    assert!(err.is_client_error());
}

#[test]
fn repeated_calls_agree() {
    let engine = brain_engine();
    let bytes = png_bytes(40, 30);
    let first = engine.classify(&bytes).unwrap();
    for _ in 0..5 {
        assert_eq!(engine.classify(&bytes).unwrap(), first);
    }
}

#[test]
fn domain_model_failure_is_returned_unchanged() {
    let mut domains: BTreeMap<Domain, Box<dyn Classifier>> = BTreeMap::new();
    domains.insert(Domain::ChestXray, Box::new(Broken(2)));
    let engine = synthetic_engine(Box::new(Fixed(one_hot(5, 4))), domains);

    match engine.classify(&png_bytes(16, 16)) {
        Err(CascadeError::ModelEvaluation(msg)) => assert_eq!(msg, "backend unavailable"),
        other => panic!("expected ModelEvaluation, got {:?}", other),
    }
}

/// Counts calls through `&mut self`
struct Counting {
    calls: usize,
}

impl ExclusiveClassifier for Counting {
    fn num_classes(&self) -> usize {
        5
    }

    fn evaluate(&mut self, input: &ImageTensor) -> Result<Vec<f32>> {
        assert_eq!(input.shape(), &[1, 1, 32, 32]);
        self.calls += 1;
        Ok(one_hot(5, 0))
    }
}

#[test]
fn engine_is_shared_across_threads() {
    let engine = Arc::new(synthetic_engine(Box::new(Serialized::new(Counting { calls: 0 })), BTreeMap::new()));
    let bytes = Arc::new(png_bytes(20, 20));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let bytes = Arc::clone(&bytes);
            std::thread::spawn(move || {
                (0..3)
                    .map(|_| engine.classify(&bytes).unwrap())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    for handle in handles {
        for result in handle.join().unwrap() {
            assert_eq!(result.domain, Domain::BloodCancer);
            assert_eq!(result.class_name, "benign");
        }
    }
}
