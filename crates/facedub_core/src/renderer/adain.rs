use burn::module::Module;
use burn::nn::{InstanceNorm, InstanceNormConfig, Linear, LinearConfig};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// Adaptive instance normalization: affine-free instance statistics, then a
/// per-channel scale/shift predicted from the conditioning vector. This is
/// the seam a future audio pathway plugs into without architecture changes.
#[derive(Module, Debug)]
pub struct AdaIn<B: Backend> {
    pub norm: InstanceNorm<B>,
    pub scale: Linear<B>,
    pub shift: Linear<B>,
}

impl<B: Backend> AdaIn<B> {
    pub fn new(channels: usize, cond_dim: usize, device: &B::Device) -> Self {
        Self {
            norm: InstanceNormConfig::new(channels).with_affine(false).init(device),
            scale: LinearConfig::new(cond_dim, channels).init(device),
            shift: LinearConfig::new(cond_dim, channels).init(device),
        }
    }

    /// `x` is `[N, C, H, W]`, `cond` is `[N, cond_dim]`.
    pub fn forward(&self, x: Tensor<B, 4>, cond: Tensor<B, 2>) -> Tensor<B, 4> {
        let [n, c, _, _] = x.dims();
        let normed = self.norm.forward(x);
        let gamma = self.scale.forward(cond.clone()).reshape([n, c, 1, 1]);
        let beta = self.shift.forward(cond).reshape([n, c, 1, 1]);
        normed * gamma.add_scalar(1.0) + beta
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray<f32>;

    #[test]
    fn normalization_zeroes_instance_statistics() {
        let device = Default::default();
        let adain = AdaIn::<TestBackend>::new(4, 8, &device);
        let x = Tensor::<TestBackend, 4>::random([2, 4, 16, 16], Distribution::Normal(3.0, 2.0), &device);
        let normed = adain.norm.forward(x);
        let mean = normed.clone().mean().into_scalar();
        assert!(mean.abs() < 1e-3, "mean after instance norm was {mean}");
        let var = normed.powf_scalar(2.0).mean().into_scalar();
        assert!((var - 1.0).abs() < 1e-2, "variance after instance norm was {var}");
    }

    #[test]
    fn conditioning_modulates_the_output() {
        let device = Default::default();
        let adain = AdaIn::<TestBackend>::new(4, 8, &device);
        let x = Tensor::random([1, 4, 8, 8], Distribution::Normal(0.0, 1.0), &device);
        let a = adain.forward(x.clone(), Tensor::zeros([1, 8], &device));
        let b = adain.forward(x, Tensor::ones([1, 8], &device).mul_scalar(2.0));
        let diff = (a - b).abs().mean().into_scalar();
        assert!(diff > 1e-6, "conditioning had no effect");
    }
}
