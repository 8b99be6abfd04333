use crate::config::ModelConfig;
use crate::renderer::adain::AdaIn;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig};
use burn::nn::{Initializer, LeakyRelu, LeakyReluConfig, PaddingConfig2d, Relu};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

fn gan_init() -> Initializer {
    Initializer::Normal { mean: 0.0, std: 0.02 }
}

fn down_conv<B: Backend>(cin: usize, cout: usize, device: &B::Device) -> Conv2d<B> {
    Conv2dConfig::new([cin, cout], [4, 4])
        .with_stride([2, 2])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .with_initializer(gan_init())
        .init(device)
}

fn up_conv<B: Backend>(cin: usize, cout: usize, device: &B::Device) -> ConvTranspose2d<B> {
    ConvTranspose2dConfig::new([cin, cout], [4, 4])
        .with_stride([2, 2])
        .with_padding([1, 1])
        .with_initializer(gan_init())
        .init(device)
}

#[derive(Module, Debug)]
pub struct DownBlock<B: Backend> {
    pub conv: Conv2d<B>,
    pub adain: AdaIn<B>,
    pub act: LeakyRelu,
}

impl<B: Backend> DownBlock<B> {
    fn new(cin: usize, cout: usize, cond_dim: usize, device: &B::Device) -> Self {
        Self {
            conv: down_conv(cin, cout, device),
            adain: AdaIn::new(cout, cond_dim, device),
            act: LeakyReluConfig::new().with_negative_slope(0.2).init(),
        }
    }

    fn forward(&self, x: Tensor<B, 4>, cond: Tensor<B, 2>) -> Tensor<B, 4> {
        self.act.forward(self.adain.forward(self.conv.forward(x), cond))
    }
}

#[derive(Module, Debug)]
pub struct UpBlock<B: Backend> {
    pub conv: ConvTranspose2d<B>,
    pub adain: AdaIn<B>,
    pub act: Relu,
}

impl<B: Backend> UpBlock<B> {
    fn new(cin: usize, cout: usize, cond_dim: usize, device: &B::Device) -> Self {
        Self {
            conv: up_conv(cin, cout, device),
            adain: AdaIn::new(cout, cond_dim, device),
            act: Relu::new(),
        }
    }

    fn forward(&self, x: Tensor<B, 4>, cond: Tensor<B, 2>) -> Tensor<B, 4> {
        self.act.forward(self.adain.forward(self.conv.forward(x), cond))
    }
}

/// Conditional encoder-decoder: five stride-2 levels down, five up with skip
/// connections, every level modulated by the conditioning vector through
/// adaptive instance normalization. The final layer is linear; outputs are
/// intended in [0, 1] but deliberately not clamped, consumers clip before
/// visualization.
#[derive(Module, Debug)]
pub struct Renderer<B: Backend> {
    pub down: Vec<DownBlock<B>>,
    pub up: Vec<UpBlock<B>>,
    pub output: ConvTranspose2d<B>,
    in_channels: usize,
    cond_dim: usize,
}

impl<B: Backend> Renderer<B> {
    /// # Panics
    /// Will panic if the config does not validate
    pub fn init(config: &ModelConfig, device: &B::Device) -> Self {
        config.validate();
        let c = config.texture_channels;
        let f = config.renderer_features;
        let cond = config.cond_dim;
        let down = vec![
            DownBlock::new(c, f, cond, device),
            DownBlock::new(f, 2 * f, cond, device),
            DownBlock::new(2 * f, 4 * f, cond, device),
            DownBlock::new(4 * f, 8 * f, cond, device),
            DownBlock::new(8 * f, 8 * f, cond, device),
        ];
        // Each up level consumes the previous output concatenated with the
        // skip from the matching down level.
        let up = vec![
            UpBlock::new(8 * f, 8 * f, cond, device),
            UpBlock::new(16 * f, 4 * f, cond, device),
            UpBlock::new(8 * f, 2 * f, cond, device),
            UpBlock::new(4 * f, f, cond, device),
        ];
        let output = up_conv(2 * f, 3, device);
        Self {
            down,
            up,
            output,
            in_channels: c,
            cond_dim: cond,
        }
    }

    /// `input` is `[N, C, S, S]` with S divisible by 32, `cond` is
    /// `[N, cond_dim]`; returns RGB `[N, 3, S, S]`.
    ///
    /// # Panics
    /// Will panic if the input does not match the configured channel count
    pub fn forward(&self, input: Tensor<B, 4>, cond: Tensor<B, 2>) -> Tensor<B, 4> {
        let [n, c, h, w] = input.dims();
        assert!(
            c == self.in_channels,
            "Renderer input has {c} channels, expected {}",
            self.in_channels
        );
        assert!(h == w && h % 32 == 0, "Renderer input must be square and divisible by 32, got {h}x{w}");
        assert!(
            cond.dims() == [n, self.cond_dim],
            "Conditioning vector shape mismatch: {:?} != [{n}, {}]",
            cond.dims(),
            self.cond_dim
        );

        let mut skips = Vec::with_capacity(self.down.len());
        let mut x = input;
        for block in &self.down {
            x = block.forward(x, cond.clone());
            skips.push(x.clone());
        }
        for (i, block) in self.up.iter().enumerate() {
            x = block.forward(x, cond.clone());
            let skip = skips[self.down.len() - 2 - i].clone();
            x = Tensor::cat(vec![x, skip], 1);
        }
        self.output.forward(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray<f32>;

    fn small_config() -> ModelConfig {
        ModelConfig::new()
            .with_image_size(64)
            .with_texture_size(32)
            .with_texture_channels(4)
            .with_cond_dim(16)
            .with_renderer_features(8)
    }

    #[test]
    fn renders_rgb_at_input_resolution() {
        let device = Default::default();
        let renderer = Renderer::<TestBackend>::init(&small_config(), &device);
        let input = Tensor::random([2, 4, 64, 64], Distribution::Normal(0.0, 1.0), &device);
        let cond = Tensor::ones([2, 16], &device);
        let out = renderer.forward(input, cond);
        assert_eq!(out.dims(), [2, 3, 64, 64]);
    }

    #[test]
    fn conditioning_vector_changes_the_rendering() {
        let device = Default::default();
        let renderer = Renderer::<TestBackend>::init(&small_config(), &device);
        let input = Tensor::random([1, 4, 64, 64], Distribution::Normal(0.0, 1.0), &device);
        let a = renderer.forward(input.clone(), Tensor::ones([1, 16], &device));
        let b = renderer.forward(input, Tensor::zeros([1, 16], &device));
        let diff = (a - b).abs().mean().into_scalar();
        assert!(diff > 1e-6);
    }

    #[test]
    #[should_panic(expected = "Renderer input has")]
    fn channel_mismatch_is_fatal() {
        let device = Default::default();
        let renderer = Renderer::<TestBackend>::init(&small_config(), &device);
        let input = Tensor::<TestBackend, 4>::zeros([1, 5, 64, 64], &device);
        renderer.forward(input, Tensor::ones([1, 16], &device));
    }
}
