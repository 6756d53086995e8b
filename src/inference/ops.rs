//! CPU kernels for the convolutional classifier.
//!
//! Activations are `[channels, height, width]` for a single image.

use ndarray::{s, Array1, Array2, Array3, ArrayD, Axis, Ix1, Ix2, Ix4};

use super::error::{CascadeError, Result};

/// 2-D convolution without bias, lowered to a matrix product (im2col).
#[derive(Debug, Clone)]
pub struct Conv2d {
    /// Weights flattened to `[out_channels, in_channels * kh * kw]`
    kernel: Array2<f32>,
    in_channels: usize,
    kernel_h: usize,
    kernel_w: usize,
    stride: usize,
    padding: usize,
}

impl Conv2d {
    /// Builds a convolution from a `[out, in, kh, kw]` weight tensor.
    pub fn new(weight: ArrayD<f32>, stride: usize, padding: usize) -> std::result::Result<Self, String> {
        if stride == 0 {
            return Err("stride must be positive".into());
        }
        let weight = weight
            .into_dimensionality::<Ix4>()
            .map_err(|e| format!("convolution weight must be 4-D: {}", e))?;
        let (out_channels, in_channels, kernel_h, kernel_w) = weight.dim();
        let kernel = weight
            .as_standard_layout()
            .into_owned()
            .into_shape_with_order((out_channels, in_channels * kernel_h * kernel_w))
            .map_err(|e| e.to_string())?;

        Ok(Self {
            kernel,
            in_channels,
            kernel_h,
            kernel_w,
            stride,
            padding,
        })
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.kernel.nrows()
    }

    /// `(height, width)` of the kernel
    pub fn kernel_size(&self) -> (usize, usize) {
        (self.kernel_h, self.kernel_w)
    }

    pub fn forward(&self, input: &Array3<f32>) -> Result<Array3<f32>> {
        let (channels, height, width) = input.dim();
        if channels != self.in_channels {
            return Err(CascadeError::ModelEvaluation(format!(
                "convolution expects {} input channels, got {}",
                self.in_channels, channels
            )));
        }
        let (kh, kw, stride, pad) = (self.kernel_h, self.kernel_w, self.stride, self.padding);
        if height + 2 * pad < kh || width + 2 * pad < kw {
            return Err(CascadeError::ModelEvaluation(format!(
                "{}x{} input is smaller than the {}x{} kernel",
                height, width, kh, kw
            )));
        }

        let out_h = (height + 2 * pad - kh) / stride + 1;
        let out_w = (width + 2 * pad - kw) / stride + 1;

        // Zero-initialised so padded taps contribute nothing
        let mut columns = Array2::<f32>::zeros((channels * kh * kw, out_h * out_w));
        for c in 0..channels {
            let plane = input.index_axis(Axis(0), c);
            for ky in 0..kh {
                for kx in 0..kw {
                    let mut row = columns.row_mut((c * kh + ky) * kw + kx);
                    for oy in 0..out_h {
                        let iy = (oy * stride + ky) as isize - pad as isize;
                        if iy < 0 || iy >= height as isize {
                            continue;
                        }
                        for ox in 0..out_w {
                            let ix = (ox * stride + kx) as isize - pad as isize;
                            if ix < 0 || ix >= width as isize {
                                continue;
                            }
                            row[oy * out_w + ox] = plane[[iy as usize, ix as usize]];
                        }
                    }
                }
            }
        }

        self.kernel
            .dot(&columns)
            .into_shape_with_order((self.out_channels(), out_h, out_w))
            .map_err(|e| CascadeError::ModelEvaluation(e.to_string()))
    }
}

/// Inference-mode batch normalization folded into a per-channel affine map.
#[derive(Debug, Clone)]
pub struct BatchNorm {
    scale: Array1<f32>,
    shift: Array1<f32>,
}

impl BatchNorm {
    pub fn new(
        weight: ArrayD<f32>,
        bias: ArrayD<f32>,
        running_mean: ArrayD<f32>,
        running_var: ArrayD<f32>,
        eps: f32,
    ) -> std::result::Result<Self, String> {
        let as_vector = |a: ArrayD<f32>, what: &str| {
            a.into_dimensionality::<Ix1>()
                .map_err(|e| format!("batch norm {} must be 1-D: {}", what, e))
        };
        let weight = as_vector(weight, "weight")?;
        let bias = as_vector(bias, "bias")?;
        let mean = as_vector(running_mean, "running_mean")?;
        let var = as_vector(running_var, "running_var")?;

        let n = weight.len();
        if bias.len() != n || mean.len() != n || var.len() != n {
            return Err(format!(
                "batch norm parameter lengths disagree: {} {} {} {}",
                n, bias.len(), mean.len(), var.len()
            ));
        }

        let scale = &weight / &var.mapv(|v| (v + eps).sqrt());
        let shift = &bias - &(&mean * &scale);
        Ok(Self { scale, shift })
    }

    pub fn channels(&self) -> usize {
        self.scale.len()
    }

    pub fn forward_inplace(&self, x: &mut Array3<f32>) -> Result<()> {
        if x.dim().0 != self.channels() {
            return Err(CascadeError::ModelEvaluation(format!(
                "batch norm expects {} channels, got {}",
                self.channels(),
                x.dim().0
            )));
        }
        for (c, mut plane) in x.axis_iter_mut(Axis(0)).enumerate() {
            let (scale, shift) = (self.scale[c], self.shift[c]);
            plane.mapv_inplace(|v| v * scale + shift);
        }
        Ok(())
    }
}

/// Fully connected layer `y = W x + b`.
#[derive(Debug, Clone)]
pub struct Linear {
    weight: Array2<f32>,
    bias: Array1<f32>,
}

impl Linear {
    pub fn new(weight: ArrayD<f32>, bias: ArrayD<f32>) -> std::result::Result<Self, String> {
        let weight = weight
            .into_dimensionality::<Ix2>()
            .map_err(|e| format!("linear weight must be 2-D: {}", e))?;
        let bias = bias
            .into_dimensionality::<Ix1>()
            .map_err(|e| format!("linear bias must be 1-D: {}", e))?;
        if bias.len() != weight.nrows() {
            return Err(format!(
                "linear bias has {} entries for {} outputs",
                bias.len(),
                weight.nrows()
            ));
        }
        Ok(Self { weight, bias })
    }

    pub fn in_features(&self) -> usize {
        self.weight.ncols()
    }

    pub fn out_features(&self) -> usize {
        self.weight.nrows()
    }

    pub fn forward(&self, x: &Array1<f32>) -> Result<Array1<f32>> {
        if x.len() != self.in_features() {
            return Err(CascadeError::ModelEvaluation(format!(
                "linear layer expects {} features, got {}",
                self.in_features(),
                x.len()
            )));
        }
        Ok(self.weight.dot(x) + &self.bias)
    }
}

pub fn relu_inplace(x: &mut Array3<f32>) {
    x.mapv_inplace(|v| v.max(0.0));
}

/// Max pooling; padded positions never win.
pub fn max_pool2d(input: &Array3<f32>, kernel: usize, stride: usize, padding: usize) -> Result<Array3<f32>> {
    let (channels, height, width) = input.dim();
    if stride == 0 || kernel == 0 || height + 2 * padding < kernel || width + 2 * padding < kernel {
        return Err(CascadeError::ModelEvaluation(format!(
            "invalid pooling of {}x{} input with kernel {} stride {}",
            height, width, kernel, stride
        )));
    }
    let out_h = (height + 2 * padding - kernel) / stride + 1;
    let out_w = (width + 2 * padding - kernel) / stride + 1;

    let mut out = Array3::<f32>::from_elem((channels, out_h, out_w), f32::NEG_INFINITY);
    for c in 0..channels {
        for oy in 0..out_h {
            let y0 = (oy * stride).saturating_sub(padding);
            let y1 = (oy * stride + kernel).saturating_sub(padding).min(height);
            for ox in 0..out_w {
                let x0 = (ox * stride).saturating_sub(padding);
                let x1 = (ox * stride + kernel).saturating_sub(padding).min(width);
                let window = input.slice(s![c, y0..y1, x0..x1]);
                out[[c, oy, ox]] = window.fold(f32::NEG_INFINITY, |acc, &v| acc.max(v));
            }
        }
    }
    Ok(out)
}

/// Averages each channel over its spatial extent
pub fn global_avg_pool(input: &Array3<f32>) -> Array1<f32> {
    let area = (input.dim().1 * input.dim().2).max(1) as f32;
    input
        .axis_iter(Axis(0))
        .map(|plane| plane.sum() / area)
        .collect()
}
