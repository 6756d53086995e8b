//! ResNet classifier backed by a GGUF artifact.
//!
//! The network is the torchvision basic-block ResNet: a 7x7/2 stem with
//! batch norm, ReLU and 3x3/2 max pooling, then stages of basic blocks, then
//! global average pooling and a linear head. Parameter names follow the
//! torchvision state dict (`conv1.weight`, `layer2.0.downsample.0.weight`,
//! `fc.bias`, ...). Channel widths are taken from the tensors themselves;
//! the number of blocks per stage comes from `resnet.block_count`.

use std::path::{Path, PathBuf};
use ndarray::{Array3, Axis};
use tracing::{debug, info};

use crate::gguf::{GGUFReader, GGUFValue};
use super::classifier::Classifier;
use super::error::{CascadeError, Result};
use super::ops::{self, BatchNorm, Conv2d, Linear};
use super::preprocess::ImageTensor;

pub const ARCHITECTURE: &str = "resnet";
pub const KEY_NUM_CLASSES: &str = "resnet.num_classes";
pub const KEY_BLOCK_COUNT: &str = "resnet.block_count";
pub const KEY_BN_EPSILON: &str = "resnet.batch_norm_epsilon";

/// ResNet-18 layout
const DEFAULT_BLOCK_COUNT: [usize; 4] = [2, 2, 2, 2];
const DEFAULT_BN_EPSILON: f32 = 1e-5;

struct BasicBlock {
    conv1: Conv2d,
    bn1: BatchNorm,
    conv2: Conv2d,
    bn2: BatchNorm,
    downsample: Option<(Conv2d, BatchNorm)>,
}

impl BasicBlock {
    fn forward(&self, x: &Array3<f32>) -> Result<Array3<f32>> {
        let mut out = self.conv1.forward(x)?;
        self.bn1.forward_inplace(&mut out)?;
        ops::relu_inplace(&mut out);
        let mut out = self.conv2.forward(&out)?;
        self.bn2.forward_inplace(&mut out)?;

        match &self.downsample {
            Some((conv, bn)) => {
                let mut shortcut = conv.forward(x)?;
                bn.forward_inplace(&mut shortcut)?;
                add_residual(&mut out, &shortcut)?;
            }
            None => add_residual(&mut out, x)?,
        }
        ops::relu_inplace(&mut out);
        Ok(out)
    }
}

fn add_residual(out: &mut Array3<f32>, shortcut: &Array3<f32>) -> Result<()> {
    if out.dim() != shortcut.dim() {
        return Err(CascadeError::ModelEvaluation(format!(
            "residual shape {:?} does not match block output {:?}",
            shortcut.dim(),
            out.dim()
        )));
    }
    *out += shortcut;
    Ok(())
}

/// A fully validated ResNet held in memory.
pub struct ResNetClassifier {
    name: String,
    path: PathBuf,
    stem: Conv2d,
    stem_bn: BatchNorm,
    blocks: Vec<BasicBlock>,
    fc: Linear,
    tensor_count: usize,
}

impl ResNetClassifier {
    /// Loads and validates an artifact.
    ///
    /// # Errors
    /// `CascadeError::ModelLoad` if the file is missing, is not a GGUF
    /// ResNet, lacks a parameter, or has shapes that do not chain together.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(CascadeError::load(path, "artifact not found"));
        }
        let reader = GGUFReader::new(path).map_err(|e| CascadeError::load(path, e))?;
        let model = Self::from_reader(&reader).map_err(|reason| CascadeError::load(path, reason))?;
        info!(
            "Loaded {} from {} ({} tensors, {} classes)",
            model.name,
            path.display(),
            model.tensor_count,
            model.fc.out_features()
        );
        Ok(model)
    }

    /// Builds the network from an opened artifact.
    pub fn from_reader(reader: &GGUFReader) -> std::result::Result<Self, String> {
        let architecture = reader
            .get_metadata_value("general.architecture")
            .map_err(|e| e.to_string())?;
        if architecture.as_str() != Some(ARCHITECTURE) {
            return Err(format!("unsupported architecture {}", architecture));
        }

        let declared = reader
            .get_metadata_value(KEY_NUM_CLASSES)
            .map_err(|e| e.to_string())?
            .as_int()
            .filter(|n| *n > 0)
            .ok_or_else(|| format!("{} must be a positive integer", KEY_NUM_CLASSES))?
            as usize;

        let block_count = match reader.metadata.get(KEY_BLOCK_COUNT) {
            Some((_, value)) => parse_block_count(value)?,
            None => DEFAULT_BLOCK_COUNT.to_vec(),
        };

        let eps = match reader.metadata.get(KEY_BN_EPSILON) {
            Some((_, value)) => value
                .as_float()
                .filter(|e| *e > 0.0)
                .ok_or_else(|| format!("{} must be a positive number", KEY_BN_EPSILON))?
                as f32,
            None => DEFAULT_BN_EPSILON,
        };

        let tensor = |name: &str| reader.tensor(name).map_err(|e| e.to_string());
        let batch_norm = |prefix: &str, channels: usize| -> std::result::Result<BatchNorm, String> {
            let bn = BatchNorm::new(
                tensor(&format!("{}.weight", prefix))?,
                tensor(&format!("{}.bias", prefix))?,
                tensor(&format!("{}.running_mean", prefix))?,
                tensor(&format!("{}.running_var", prefix))?,
                eps,
            )
            .map_err(|e| format!("{}: {}", prefix, e))?;
            if bn.channels() != channels {
                return Err(format!("{} has {} channels, expected {}", prefix, bn.channels(), channels));
            }
            Ok(bn)
        };

        let stem = Conv2d::new(tensor("conv1.weight")?, 2, 3).map_err(|e| format!("conv1: {}", e))?;
        let stem_bn = batch_norm("bn1", stem.out_channels())?;
        let mut channels = stem.out_channels();

        let mut blocks = Vec::new();
        for (stage, &count) in block_count.iter().enumerate() {
            for index in 0..count {
                let prefix = format!("layer{}.{}", stage + 1, index);
                let stride = if stage > 0 && index == 0 { 2 } else { 1 };

                let conv1 = Conv2d::new(tensor(&format!("{}.conv1.weight", prefix))?, stride, 1)
                    .map_err(|e| format!("{}.conv1: {}", prefix, e))?;
                expect_conv(&conv1, &format!("{}.conv1", prefix), channels, (3, 3))?;
                let bn1 = batch_norm(&format!("{}.bn1", prefix), conv1.out_channels())?;

                let conv2 = Conv2d::new(tensor(&format!("{}.conv2.weight", prefix))?, 1, 1)
                    .map_err(|e| format!("{}.conv2: {}", prefix, e))?;
                expect_conv(&conv2, &format!("{}.conv2", prefix), conv1.out_channels(), (3, 3))?;
                let bn2 = batch_norm(&format!("{}.bn2", prefix), conv2.out_channels())?;

                let downsample_weight = format!("{}.downsample.0.weight", prefix);
                let downsample = if reader.has_tensor(&downsample_weight) {
                    let conv = Conv2d::new(tensor(&downsample_weight)?, stride, 0)
                        .map_err(|e| format!("{}: {}", downsample_weight, e))?;
                    expect_conv(&conv, &downsample_weight, channels, (1, 1))?;
                    if conv.out_channels() != conv2.out_channels() {
                        return Err(format!(
                            "{} projects to {} channels, block produces {}",
                            downsample_weight,
                            conv.out_channels(),
                            conv2.out_channels()
                        ));
                    }
                    let bn = batch_norm(&format!("{}.downsample.1", prefix), conv.out_channels())?;
                    Some((conv, bn))
                } else if stride != 1 || conv2.out_channels() != channels {
                    return Err(format!("{} changes shape but has no downsample projection", prefix));
                } else {
                    None
                };

                channels = conv2.out_channels();
                blocks.push(BasicBlock { conv1, bn1, conv2, bn2, downsample });
            }
        }

        let fc = Linear::new(tensor("fc.weight")?, tensor("fc.bias")?).map_err(|e| format!("fc: {}", e))?;
        if fc.in_features() != channels {
            return Err(format!("fc expects {} features, backbone produces {}", fc.in_features(), channels));
        }
        if fc.out_features() != declared {
            return Err(format!(
                "{} declares {} classes but fc produces {}",
                KEY_NUM_CLASSES,
                declared,
                fc.out_features()
            ));
        }

        let name = reader
            .get_metadata_value("general.name")
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| {
                reader
                    .path
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_else(|| ARCHITECTURE.to_string())
            });

        debug!("Built {} with {} blocks, {} -> {} features", name, blocks.len(), channels, declared);

        Ok(Self {
            name,
            path: reader.path.clone(),
            stem,
            stem_bn,
            blocks,
            fc,
            tensor_count: reader.tensors.len(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tensor_count(&self) -> usize {
        self.tensor_count
    }

    /// Channels the stem convolution was trained on
    pub fn input_channels(&self) -> usize {
        self.stem.in_channels()
    }

    fn forward(&self, input: &ImageTensor) -> Result<Vec<f32>> {
        let (batch, channels, height, width) = input.dim();
        if batch != 1 {
            return Err(CascadeError::ModelEvaluation(format!("expected a single image, got batch of {}", batch)));
        }

        let image = input.index_axis(Axis(0), 0);
        let expected = self.stem.in_channels();
        let mut x = if channels == expected {
            image.to_owned()
        } else if channels == 1 {
            // Luma input for an RGB-trained stem: repeat the plane
            image
                .broadcast((expected, height, width))
                .ok_or_else(|| CascadeError::ModelEvaluation("cannot broadcast input channels".into()))?
                .to_owned()
        } else {
            return Err(CascadeError::ModelEvaluation(format!(
                "model expects {} input channels, got {}",
                expected, channels
            )));
        };

        x = self.stem.forward(&x)?;
        self.stem_bn.forward_inplace(&mut x)?;
        ops::relu_inplace(&mut x);
        x = ops::max_pool2d(&x, 3, 2, 1)?;

        for block in &self.blocks {
            x = block.forward(&x)?;
        }

        let features = ops::global_avg_pool(&x);
        Ok(self.fc.forward(&features)?.to_vec())
    }
}

impl Classifier for ResNetClassifier {
    fn num_classes(&self) -> usize {
        self.fc.out_features()
    }

    fn evaluate(&self, input: &ImageTensor) -> Result<Vec<f32>> {
        self.forward(input)
    }

    fn architecture(&self) -> &str {
        ARCHITECTURE
    }
}

fn parse_block_count(value: &GGUFValue) -> std::result::Result<Vec<usize>, String> {
    let entries = value
        .as_array()
        .ok_or_else(|| format!("{} must be an array", KEY_BLOCK_COUNT))?;
    if entries.is_empty() {
        return Err(format!("{} is empty", KEY_BLOCK_COUNT));
    }
    entries
        .iter()
        .map(|v| match v.as_int() {
            Some(n) if n > 0 => Ok(n as usize),
            _ => Err(format!("{} entries must be positive integers, got {}", KEY_BLOCK_COUNT, v)),
        })
        .collect()
}

fn expect_conv(conv: &Conv2d, name: &str, in_channels: usize, kernel: (usize, usize)) -> std::result::Result<(), String> {
    if conv.in_channels() != in_channels {
        return Err(format!("{} takes {} channels, previous layer produces {}", name, conv.in_channels(), in_channels));
    }
    if conv.kernel_size() != kernel {
        return Err(format!("{} has kernel {:?}, expected {:?}", name, conv.kernel_size(), kernel));
    }
    Ok(())
}
