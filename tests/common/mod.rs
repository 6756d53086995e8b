//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::Path;

use image::{DynamicImage, GrayImage, ImageOutputFormat, Luma};
use medcascade::gguf::GGUFWriter;
use medcascade::inference::{
    CascadeEngine, CascadeError, Catalog, Classifier, Domain, ImageTensor, ModelRegistry, Preprocessor, Result,
};

/// Shape and head of a miniature ResNet artifact.
pub struct TinyResNet {
    pub in_channels: usize,
    /// Stem width; each later stage doubles it
    pub width: usize,
    pub block_count: Vec<usize>,
    /// Rows of `fc`
    pub classes: usize,
    /// Value written to `resnet.num_classes`
    pub declared_classes: usize,
    /// `fc.bias`; defaults to zeros
    pub bias: Option<Vec<f32>>,
    /// When false `fc.weight` is all zeros, so the logits equal the bias
    pub random_head: bool,
    /// Tensor left out of the artifact
    pub omit: Option<String>,
    pub architecture: String,
}

impl TinyResNet {
    pub fn new(classes: usize) -> Self {
        Self {
            in_channels: 1,
            width: 4,
            block_count: vec![1, 1],
            classes,
            declared_classes: classes,
            bias: None,
            random_head: false,
            omit: None,
            architecture: "resnet".to_string(),
        }
    }

    pub fn with_bias(mut self, bias: &[f32]) -> Self {
        self.classes = bias.len();
        self.declared_classes = bias.len();
        self.bias = Some(bias.to_vec());
        self
    }

    /// Logits whose argmax is `winner`
    pub fn favouring(classes: usize, winner: usize) -> Self {
        let bias: Vec<f32> = (0..classes).map(|i| if i == winner { 2.0 } else { -1.0 }).collect();
        Self::new(classes).with_bias(&bias)
    }

    pub fn write(&self, path: &Path) {
        let mut writer = GGUFWriter::new();
        writer.add_string("general.architecture", &self.architecture);
        writer.add_string("general.name", "tiny-resnet");
        writer.add_u32("resnet.num_classes", self.declared_classes as u32);
        let counts: Vec<u32> = self.block_count.iter().map(|c| *c as u32).collect();
        writer.add_u32_array("resnet.block_count", &counts);
        writer.add_f32("resnet.batch_norm_epsilon", 1e-5);

        let mut tensors: Vec<(String, Vec<usize>, Vec<f32>)> = Vec::new();
        let mut seed = 0.0f32;
        let mut conv = |name: String, out: usize, inp: usize, k: usize, tensors: &mut Vec<(String, Vec<usize>, Vec<f32>)>| {
            seed += 1.0;
            let shape = vec![out, inp, k, k];
            let n = out * inp * k * k;
            tensors.push((name, shape, pseudo_random(n, seed, 0.3)));
        };
        fn bn(prefix: &str, channels: usize, tensors: &mut Vec<(String, Vec<usize>, Vec<f32>)>) {
            let ramp = |scale: f32, offset: f32| -> Vec<f32> {
                (0..channels).map(|i| offset + scale * (i as f32 + 1.0).sin()).collect()
            };
            tensors.push((format!("{}.weight", prefix), vec![channels], ramp(0.1, 1.0)));
            tensors.push((format!("{}.bias", prefix), vec![channels], ramp(0.05, 0.0)));
            tensors.push((format!("{}.running_mean", prefix), vec![channels], ramp(0.02, 0.0)));
            tensors.push((format!("{}.running_var", prefix), vec![channels], ramp(0.1, 1.0)));
        }

        conv("conv1.weight".to_string(), self.width, self.in_channels, 7, &mut tensors);
        bn("bn1", self.width, &mut tensors);

        let mut channels = self.width;
        for (stage, count) in self.block_count.iter().enumerate() {
            let out = self.width << stage;
            for index in 0..*count {
                let prefix = format!("layer{}.{}", stage + 1, index);
                let stride = if stage > 0 && index == 0 { 2 } else { 1 };
                conv(format!("{}.conv1.weight", prefix), out, channels, 3, &mut tensors);
                bn(&format!("{}.bn1", prefix), out, &mut tensors);
                conv(format!("{}.conv2.weight", prefix), out, out, 3, &mut tensors);
                bn(&format!("{}.bn2", prefix), out, &mut tensors);
                if stride != 1 || channels != out {
                    conv(format!("{}.downsample.0.weight", prefix), out, channels, 1, &mut tensors);
                    bn(&format!("{}.downsample.1", prefix), out, &mut tensors);
                }
                channels = out;
            }
        }

        let fc_weight = if self.random_head {
            pseudo_random(self.classes * channels, 99.0, 0.5)
        } else {
            vec![0.0; self.classes * channels]
        };
        tensors.push(("fc.weight".to_string(), vec![self.classes, channels], fc_weight));
        let bias = self.bias.clone().unwrap_or_else(|| vec![0.0; self.classes]);
        tensors.push(("fc.bias".to_string(), vec![self.classes], bias));

        for (name, shape, data) in &tensors {
            if self.omit.as_deref() == Some(name.as_str()) {
                continue;
            }
            writer.add_tensor(name, shape, data);
        }
        writer.write_to_file(path).unwrap();
    }
}

/// Deterministic values in `[-scale, scale]`
pub fn pseudo_random(n: usize, seed: f32, scale: f32) -> Vec<f32> {
    (0..n).map(|i| ((i as f32 * 0.618 + seed) * 12.9898).sin() * scale).collect()
}

/// Writes the router and every standard domain artifact into `dir`.
/// The router favours `domain`; each domain model favours its class `class`
/// when it is in range, otherwise class 0.
pub fn write_standard_models(dir: &Path, domain: Domain, class: usize) {
    let catalog = Catalog::standard();
    let router_winner = catalog.index_of(domain).unwrap();
    TinyResNet::favouring(catalog.len(), router_winner).write(&dir.join("General_Model.gguf"));
    for d in catalog.domains() {
        let n = catalog.classes(*d).unwrap().len();
        let winner = if class < n { class } else { 0 };
        TinyResNet::favouring(n, winner).write(&dir.join(format!("{}_Model.gguf", d)));
    }
}

/// Encodes a gradient PNG
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = DynamicImage::ImageLuma8(GrayImage::from_fn(width, height, |x, y| {
        Luma([((x * 5 + y * 3) % 256) as u8])
    }));
    let mut buf = Vec::new();
    image.write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png).unwrap();
    buf
}

/// Returns the same scores for every input
pub struct Fixed(pub Vec<f32>);

impl Classifier for Fixed {
    fn num_classes(&self) -> usize {
        self.0.len()
    }

    fn evaluate(&self, _input: &ImageTensor) -> Result<Vec<f32>> {
        Ok(self.0.clone())
    }

    fn architecture(&self) -> &str {
        "fixed"
    }
}

/// Fails every evaluation
pub struct Broken(pub usize);

impl Classifier for Broken {
    fn num_classes(&self) -> usize {
        self.0
    }

    fn evaluate(&self, _input: &ImageTensor) -> Result<Vec<f32>> {
        Err(CascadeError::ModelEvaluation("backend unavailable".into()))
    }
}

/// One-hot scores of length `n`
pub fn one_hot(n: usize, hot: usize) -> Vec<f32> {
    (0..n).map(|i| if i == hot { 1.0 } else { 0.0 }).collect()
}

/// Engine over synthetic classifiers: `router` as given, and each domain
/// model returning the scores in `domain_scores`, or a one-hot on class 0.
pub fn synthetic_engine(router: Box<dyn Classifier>, mut domain_scores: BTreeMap<Domain, Box<dyn Classifier>>) -> CascadeEngine {
    let catalog = Catalog::standard();
    let models = catalog
        .domains()
        .iter()
        .map(|d| {
            let model = domain_scores
                .remove(d)
                .unwrap_or_else(|| Box::new(Fixed(one_hot(d.standard_classes().len(), 0))) as Box<dyn Classifier>);
            (*d, model)
        })
        .collect();
    let registry = ModelRegistry::from_classifiers(catalog, router, models).unwrap();
    CascadeEngine::new(registry, Preprocessor::new(32, 0.5, 0.5, 1 << 20))
}
