use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{PaddingConfig2d, Relu};
use burn::record::{CompactRecorder, RecorderError};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use log::warn;
use std::path::Path;

#[derive(Module, Debug)]
pub struct FeatureBlock<B: Backend> {
    pub conv1: Conv2d<B>,
    pub conv2: Conv2d<B>,
    pub act: Relu,
}

impl<B: Backend> FeatureBlock<B> {
    fn new(cin: usize, cout: usize, device: &B::Device) -> Self {
        let conv = |ci, co| {
            Conv2dConfig::new([ci, co], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device)
        };
        Self {
            conv1: conv(cin, cout),
            conv2: conv(cout, cout),
            act: Relu::new(),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.act.forward(self.conv2.forward(self.act.forward(self.conv1.forward(x))))
    }
}

/// Fixed VGG-style feature pyramid for the perceptual loss. The weights are
/// loaded from a record file and never optimized; gradients still flow
/// through the features to the rendered image. Belongs to no parameter
/// group.
#[derive(Module, Debug)]
pub struct PerceptualNet<B: Backend> {
    pub blocks: Vec<FeatureBlock<B>>,
    pub pool: MaxPool2d,
}

impl<B: Backend> PerceptualNet<B> {
    /// Random-init feature net with gradients on its weights disabled. Load
    /// pretrained weights with [`PerceptualNet::with_weights`]; without them
    /// the loss is still a valid (if weaker) multi-scale image distance.
    pub fn init(device: &B::Device) -> Self {
        let net = Self {
            blocks: vec![
                FeatureBlock::new(3, 64, device),
                FeatureBlock::new(64, 128, device),
                FeatureBlock::new(128, 256, device),
            ],
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
        };
        net.no_grad()
    }

    /// Loads pretrained weights from `path` if it exists; otherwise keeps
    /// the random init and warns.
    pub fn with_weights(self, path: Option<&Path>, device: &B::Device) -> Result<Self, RecorderError> {
        match path {
            Some(path) if path.with_extension("mpk").exists() || path.exists() => {
                let loaded = self.load_file(path.to_path_buf(), &CompactRecorder::new(), device)?;
                Ok(loaded.no_grad())
            }
            Some(path) => {
                warn!("Perceptual weights not found at {}, keeping random init", path.display());
                Ok(self)
            }
            None => {
                warn!("No perceptual weights configured, keeping random init");
                Ok(self)
            }
        }
    }

    fn features(&self, x: Tensor<B, 4>) -> Vec<Tensor<B, 4>> {
        let mut feats = Vec::with_capacity(self.blocks.len());
        let mut x = x;
        for (i, block) in self.blocks.iter().enumerate() {
            x = block.forward(x);
            feats.push(x.clone());
            if i + 1 < self.blocks.len() {
                x = self.pool.forward(x);
            }
        }
        feats
    }

    /// Mean absolute feature distance between two RGB images `[N, 3, H, W]`,
    /// summed over the pyramid levels.
    pub fn distance(&self, a: Tensor<B, 4>, b: Tensor<B, 4>) -> Tensor<B, 1> {
        let feats_a = self.features(a);
        let feats_b = self.features(b);
        let mut total: Option<Tensor<B, 1>> = None;
        for (fa, fb) in feats_a.into_iter().zip(feats_b) {
            let level = (fa - fb).abs().mean();
            total = Some(match total {
                Some(prev) => prev + level,
                None => level,
            });
        }
        total.expect("The pyramid has at least one level")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray<f32>;

    #[test]
    fn identical_images_have_zero_distance() {
        let device = Default::default();
        let net = PerceptualNet::<TestBackend>::init(&device);
        let img = Tensor::random([1, 3, 32, 32], Distribution::Uniform(0.0, 1.0), &device);
        let d = net.distance(img.clone(), img).into_scalar();
        assert!(d.abs() < 1e-6);
    }

    #[test]
    fn different_images_have_positive_distance() {
        let device = Default::default();
        let net = PerceptualNet::<TestBackend>::init(&device);
        let a = Tensor::random([1, 3, 32, 32], Distribution::Uniform(0.0, 1.0), &device);
        let b = Tensor::random([1, 3, 32, 32], Distribution::Uniform(0.0, 1.0), &device);
        assert!(net.distance(a, b).into_scalar() > 0.0);
    }

    #[test]
    fn missing_weight_file_keeps_random_init() {
        let device = Default::default();
        let net = PerceptualNet::<TestBackend>::init(&device);
        let net = net.with_weights(Some(Path::new("/nonexistent/vgg")), &device).unwrap();
        assert!(net.blocks.len() == 3);
    }
}
