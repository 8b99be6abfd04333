use crate::config::TrainConfig;
use crate::renderer::PerceptualNet;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// Mean absolute error.
pub fn l1<B: Backend, const D: usize>(a: Tensor<B, D>, b: Tensor<B, D>) -> Tensor<B, 1> {
    (a - b).abs().mean()
}

/// Least-squares GAN loss pushing `logits` toward `target` (1 for real, 0
/// for fake).
pub fn lsgan<B: Backend>(logits: Tensor<B, 4>, target: f32) -> Tensor<B, 1> {
    logits.sub_scalar(target).powf_scalar(2.0).mean()
}

/// The four generator terms plus the two reductions derived from them. The
/// adversarial term only exists as a training signal; the reported metric
/// excludes it.
pub struct GeneratorLosses<B: Backend> {
    pub reconstruction: Tensor<B, 1>,
    pub texture_consistency: Tensor<B, 1>,
    pub perceptual: Tensor<B, 1>,
    pub adversarial: Tensor<B, 1>,
    pub combined: Tensor<B, 1>,
    pub metric: Tensor<B, 1>,
}

/// Composes the generator objective from a forward pass.
///
/// `rendered` and `frames` are `[B, T, 3, S, S]`, `network_input` is the
/// pre-render composite `[B, T, C, S, S]` whose first 3 channels carry the
/// raw texture raster, `fake_logits` is the discriminator's (non-detached)
/// score of the rendered stack.
pub fn generator_losses<B: Backend>(
    config: &TrainConfig,
    rendered: Tensor<B, 5>,
    frames: Tensor<B, 5>,
    network_input: Tensor<B, 5>,
    fake_logits: Tensor<B, 4>,
    perceptual: &PerceptualNet<B>,
) -> GeneratorLosses<B> {
    let [b, t, c, h, w] = rendered.dims();
    let input_rgb = network_input.slice([0..b, 0..t, 0..3, 0..h, 0..w]);

    let texture_consistency = l1(input_rgb, frames.clone());
    let reconstruction = l1(rendered.clone(), frames.clone());
    let perceptual = perceptual.distance(rendered.reshape([b * t, c, h, w]), frames.reshape([b * t, c, h, w]));
    let adversarial = lsgan(fake_logits, 1.0);

    let combined = reconstruction.clone().mul_scalar(config.w_reconstruction)
        + texture_consistency.clone().mul_scalar(config.w_texture_consistency)
        + perceptual.clone().mul_scalar(config.w_perceptual)
        + adversarial.clone().mul_scalar(config.w_adversarial);
    let metric = reconstruction.clone() + texture_consistency.clone() + perceptual.clone();

    GeneratorLosses {
        reconstruction,
        texture_consistency,
        perceptual,
        adversarial,
        combined,
        metric,
    }
}

/// LSGAN discriminator sub-losses: real toward 1, detached fake toward 0,
/// averaged.
pub struct DiscriminatorLosses<B: Backend> {
    pub real: Tensor<B, 1>,
    pub fake: Tensor<B, 1>,
    pub total: Tensor<B, 1>,
}

pub fn discriminator_losses<B: Backend>(real_logits: Tensor<B, 4>, fake_logits: Tensor<B, 4>) -> DiscriminatorLosses<B> {
    let real = lsgan(real_logits, 1.0);
    let fake = lsgan(fake_logits, 0.0);
    let total = (real.clone() + fake.clone()).div_scalar(2.0);
    DiscriminatorLosses { real, fake, total }
}

/// Scalar validation losses for one step: reconstruction and
/// texture-consistency only, no adversarial or perceptual term.
#[derive(Clone, Copy, Debug, Default)]
pub struct ValLosses {
    pub loss: f32,
    pub loss_tex: f32,
    pub loss_img: f32,
}
