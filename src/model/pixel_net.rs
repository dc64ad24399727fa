//! Per-pixel multilayer perceptron
//!
//! Every pixel is mapped independently: a shared ReLU backbone turns the
//! input channels into a hidden feature vector, and four linear heads read
//! coarse depth, depth class, refined depth and segmentation logits from it.

use super::{DepthCompletionModel, ModelKind, ModelOutput, OutputGrads};
use crate::{Error, Result, Tensor};
use ndarray::{Array1, Array2, Array4, ArrayView2, ArrayView4, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone, Copy)]
enum Layer {
    Backbone,
    Coarse,
    Class,
    Depth,
    Segmentation,
}

impl Layer {
    const HEADS: [Layer; 4] = [Layer::Coarse, Layer::Class, Layer::Depth, Layer::Segmentation];

    fn name(self) -> &'static str {
        match self {
            Layer::Backbone => "backbone",
            Layer::Coarse => "coarse_head",
            Layer::Class => "class_head",
            Layer::Depth => "depth_head",
            Layer::Segmentation => "seg_head",
        }
    }

    /// Index of the weight tensor; the bias follows it
    fn index(self) -> usize {
        2 * self as usize
    }
}

struct Cache {
    dims: (usize, usize, usize, usize),
    input: Array2<f32>,
    pre_activation: Array2<f32>,
    hidden: Array2<f32>,
}

/// Reference network for the training engine
pub struct PixelNet {
    in_channels: usize,
    hidden: usize,
    classes: usize,
    params: Vec<Tensor>,
    names: Vec<String>,
    training: bool,
    cache: Option<Cache>,
}

impl PixelNet {
    /// Build with weights drawn uniformly from `±1/sqrt(fan_in)`
    pub fn new(in_channels: usize, hidden: usize, classes: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut params = Vec::new();
        let mut names = Vec::new();

        let layers = [
            (Layer::Backbone, in_channels, hidden),
            (Layer::Coarse, hidden, 1),
            (Layer::Class, hidden, 1),
            (Layer::Depth, hidden, 1),
            (Layer::Segmentation, hidden, classes),
        ];
        for (layer, fan_in, fan_out) in layers {
            let bound = 1.0 / (fan_in.max(1) as f32).sqrt();
            let mut init = |n: usize| -> Array1<f32> {
                (0..n).map(|_| rng.gen_range(-bound..bound)).collect()
            };
            params.push(Tensor::new(init(fan_out * fan_in), vec![fan_out, fan_in], true));
            params.push(Tensor::new(init(fan_out), vec![fan_out], true));
            names.push(format!("{}.weight", layer.name()));
            names.push(format!("{}.bias", layer.name()));
        }

        Self {
            in_channels,
            hidden,
            classes,
            params,
            names,
            training: true,
            cache: None,
        }
    }

    pub fn hidden(&self) -> usize {
        self.hidden
    }

    pub fn classes(&self) -> usize {
        self.classes
    }

    fn weight(&self, layer: Layer) -> Result<ArrayView2<'_, f32>> {
        let tensor = &self.params[layer.index()];
        tensor
            .as_matrix()
            .ok_or_else(|| Error::InvalidInput(format!("{} weight is not a matrix", layer.name())))
    }

    fn bias(&self, layer: Layer) -> &Array1<f32> {
        self.params[layer.index() + 1].data()
    }

    fn linear(&self, layer: Layer, x: &Array2<f32>) -> Result<Array2<f32>> {
        Ok(x.dot(&self.weight(layer)?.t()) + self.bias(layer))
    }
}

/// `[N, C, H, W]` to one row per pixel
fn to_rows(t: ArrayView4<'_, f32>) -> Array2<f32> {
    let (n, c, h, w) = t.dim();
    Array2::from_shape_fn((n * h * w, c), |(row, ch)| {
        let (b, rest) = (row / (h * w), row % (h * w));
        t[[b, ch, rest / w, rest % w]]
    })
}

/// One row per pixel back to `[N, C, H, W]`
fn from_rows(rows: &Array2<f32>, (n, h, w): (usize, usize, usize)) -> Array4<f32> {
    let c = rows.ncols();
    Array4::from_shape_fn((n, c, h, w), |(b, ch, y, x)| rows[[(b * h + y) * w + x, ch]])
}

fn flat(m: Array2<f32>) -> Array1<f32> {
    m.iter().copied().collect()
}

impl DepthCompletionModel for PixelNet {
    fn kind(&self) -> ModelKind {
        ModelKind::PixelNet
    }

    fn forward(&mut self, input: ArrayView4<'_, f32>, _epoch: usize) -> Result<ModelOutput> {
        let dims = input.dim();
        let (n, c, h, w) = dims;
        if c != self.in_channels {
            return Err(Error::shape_mismatch(&[n, self.in_channels, h, w], input.shape()));
        }

        let x = to_rows(input);
        let pre_activation = self.linear(Layer::Backbone, &x)?;
        let hidden = pre_activation.mapv(|v| v.max(0.0));

        let spatial = (n, h, w);
        let coarse_depth = from_rows(&self.linear(Layer::Coarse, &hidden)?, spatial);
        let depth_class = from_rows(&self.linear(Layer::Class, &hidden)?, spatial);
        let depth = from_rows(&self.linear(Layer::Depth, &hidden)?, spatial);
        let segmentation = from_rows(&self.linear(Layer::Segmentation, &hidden)?, spatial);

        self.cache = self.training.then_some(Cache {
            dims,
            input: x,
            pre_activation,
            hidden,
        });

        Ok(ModelOutput {
            coarse_depth,
            depth_class,
            depth,
            segmentation,
            auxiliary: None,
        })
    }

    fn backward(&mut self, grads: &OutputGrads) -> Result<()> {
        let cache = self
            .cache
            .take()
            .ok_or_else(|| Error::InvalidInput("backward without a training forward pass".into()))?;
        let (n, _, h, w) = cache.dims;

        let head_grads = [
            &grads.coarse_depth,
            &grads.depth_class,
            &grads.depth,
            &grads.segmentation,
        ];
        let mut d_hidden = Array2::<f32>::zeros(cache.hidden.raw_dim());
        for (layer, grad) in Layer::HEADS.into_iter().zip(head_grads) {
            let (gn, _, gh, gw) = grad.dim();
            if (gn, gh, gw) != (n, h, w) {
                return Err(Error::shape_mismatch(&[n, h, w], &[gn, gh, gw]));
            }
            let g = to_rows(grad.view());
            let weight = self.weight(layer)?;
            if g.ncols() != weight.nrows() {
                return Err(Error::shape_mismatch(&[weight.nrows()], &[g.ncols()]));
            }
            d_hidden += &g.dot(&weight);

            let d_weight = g.t().dot(&cache.hidden);
            let d_bias = g.sum_axis(Axis(0));
            self.params[layer.index()].accumulate_grad(flat(d_weight));
            self.params[layer.index() + 1].accumulate_grad(d_bias);
        }

        // ReLU
        d_hidden.zip_mut_with(&cache.pre_activation, |d, &z| {
            if z <= 0.0 {
                *d = 0.0;
            }
        });
        let d_weight = d_hidden.t().dot(&cache.input);
        let d_bias = d_hidden.sum_axis(Axis(0));
        let backbone = Layer::Backbone.index();
        self.params[backbone].accumulate_grad(flat(d_weight));
        self.params[backbone + 1].accumulate_grad(d_bias);
        Ok(())
    }

    fn parameters(&self) -> &[Tensor] {
        &self.params
    }

    fn parameters_mut(&mut self) -> &mut [Tensor] {
        &mut self.params
    }

    fn parameter_names(&self) -> &[String] {
        &self.names
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
        if !training {
            self.cache = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn input() -> Array4<f32> {
        Array4::from_shape_fn((2, 3, 2, 2), |(b, c, y, x)| {
            ((b * 7 + c * 3 + y * 2 + x) as f32 * 0.37).sin()
        })
    }

    #[test]
    fn test_output_shapes() {
        let mut net = PixelNet::new(3, 6, 4, 0);
        let out = net.forward(input().view(), 0).unwrap();
        assert_eq!(out.coarse_depth.dim(), (2, 1, 2, 2));
        assert_eq!(out.depth.dim(), (2, 1, 2, 2));
        assert_eq!(out.segmentation.dim(), (2, 4, 2, 2));
    }

    #[test]
    fn test_same_seed_same_weights() {
        let a = PixelNet::new(3, 6, 4, 11);
        let b = PixelNet::new(3, 6, 4, 11);
        assert_eq!(a.state(), b.state());
        assert_ne!(a.state(), PixelNet::new(3, 6, 4, 12).state());
    }

    #[test]
    fn test_names_follow_layers() {
        let net = PixelNet::new(3, 2, 2, 0);
        assert_eq!(net.parameter_names()[0], "backbone.weight");
        assert_eq!(net.parameter_names()[9], "seg_head.bias");
        assert_eq!(net.parameters()[0].shape(), &[2, 3]);
        assert_eq!(net.parameters()[8].shape(), &[2, 2]);
    }

    #[test]
    fn test_rejects_wrong_channel_count() {
        let mut net = PixelNet::new(5, 2, 2, 0);
        assert!(net.forward(input().view(), 0).is_err());
    }

    #[test]
    fn test_backward_requires_training_forward() {
        let mut net = PixelNet::new(3, 2, 2, 0);
        net.set_training(false);
        let out = net.forward(input().view(), 0).unwrap();
        let grads = OutputGrads {
            coarse_depth: out.coarse_depth.clone(),
            depth_class: out.depth_class.clone(),
            depth: out.depth.clone(),
            segmentation: out.segmentation.clone(),
        };
        assert!(net.backward(&grads).is_err());
    }

    #[test]
    fn test_gradient_matches_finite_difference() {
        // loss = sum(depth), so d loss / d depth = 1 everywhere
        let x = input();
        let mut net = PixelNet::new(3, 5, 2, 3);
        let out = net.forward(x.view(), 0).unwrap();
        let zeros1 = Array4::zeros(out.depth.raw_dim());
        let grads = OutputGrads {
            coarse_depth: zeros1.clone(),
            depth_class: zeros1,
            depth: Array4::ones(out.depth.raw_dim()),
            segmentation: Array4::zeros(out.segmentation.raw_dim()),
        };
        net.backward(&grads).unwrap();
        let analytic = net.parameters()[0].grad().unwrap();

        let eps = 1e-3;
        for i in [0, 4, 9] {
            let mut probe = PixelNet::new(3, 5, 2, 3);
            probe.set_training(false);
            let base = probe.forward(x.view(), 0).unwrap().depth.sum();
            probe.parameters_mut()[0].data_mut()[i] += eps;
            let moved = probe.forward(x.view(), 0).unwrap().depth.sum();
            assert_abs_diff_eq!((moved - base) / eps, analytic[i], epsilon = 2e-2);
        }
    }
}
