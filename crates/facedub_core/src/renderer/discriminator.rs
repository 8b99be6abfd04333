use crate::config::ModelConfig;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{Initializer, InstanceNorm, InstanceNormConfig, LeakyRelu, LeakyReluConfig, PaddingConfig2d};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

fn disc_conv<B: Backend>(cin: usize, cout: usize, stride: usize, device: &B::Device) -> Conv2d<B> {
    Conv2dConfig::new([cin, cout], [4, 4])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .with_initializer(Initializer::Normal { mean: 0.0, std: 0.02 })
        .init(device)
}

#[derive(Module, Debug)]
pub struct DiscBlock<B: Backend> {
    pub conv: Conv2d<B>,
    pub norm: InstanceNorm<B>,
}

impl<B: Backend> DiscBlock<B> {
    fn new(cin: usize, cout: usize, stride: usize, device: &B::Device) -> Self {
        Self {
            conv: disc_conv(cin, cout, stride, device),
            norm: InstanceNormConfig::new(cout).with_affine(false).init(device),
        }
    }
}

/// Flattens a temporal window `[B, T, 3, H, W]` into one channel stack
/// `[B, 3 * T, H, W]` so the discriminator judges temporal coherence rather
/// than single frames.
pub fn stack_temporal<B: Backend>(frames: Tensor<B, 5>) -> Tensor<B, 4> {
    let [b, t, c, h, w] = frames.dims();
    frames.reshape([b, t * c, h, w])
}

/// PatchGAN over the temporal channel stack: patch logits, real toward 1 and
/// rendered toward 0 under the least-squares objective.
#[derive(Module, Debug)]
pub struct Discriminator<B: Backend> {
    pub head: Conv2d<B>,
    pub blocks: Vec<DiscBlock<B>>,
    pub output: Conv2d<B>,
    pub act: LeakyRelu,
    in_channels: usize,
}

impl<B: Backend> Discriminator<B> {
    pub fn init(config: &ModelConfig, device: &B::Device) -> Self {
        let cin = 3 * config.temporal_window;
        let f = config.disc_features;
        Self {
            head: disc_conv(cin, f, 2, device),
            blocks: vec![
                DiscBlock::new(f, 2 * f, 2, device),
                DiscBlock::new(2 * f, 4 * f, 2, device),
                DiscBlock::new(4 * f, 8 * f, 1, device),
            ],
            output: disc_conv(8 * f, 1, 1, device),
            act: LeakyReluConfig::new().with_negative_slope(0.2).init(),
            in_channels: cin,
        }
    }

    /// `stack` is `[B, 3 * T, H, W]`; returns patch logits `[B, 1, h'', w'']`.
    ///
    /// # Panics
    /// Will panic if the stack does not match the configured window length
    pub fn forward(&self, stack: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, c, _, _] = stack.dims();
        assert!(
            c == self.in_channels,
            "Discriminator stack has {c} channels, expected {} (3 * T)",
            self.in_channels
        );
        let mut x = self.act.forward(self.head.forward(stack));
        for block in &self.blocks {
            x = self.act.forward(block.norm.forward(block.conv.forward(x)));
        }
        self.output.forward(x)
    }
}
