use crate::compositor::{self, gather_textures};
use crate::config::{ModelConfig, TrainConfig};
use crate::data::{FrameBatch, SurfaceDecoder};
use crate::metrics::MetricSink;
use crate::renderer::{stack_temporal, Discriminator, PerceptualNet, Renderer};
use crate::texture::TextureStore;
use crate::training::loss::{discriminator_losses, generator_losses, l1, ValLosses};
use crate::warp::align_surfaces;
use burn::module::AutodiffModule;
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::{Adam, AdamConfig, GradientsParams, Optimizer};
use burn::record::RecorderError;
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::module::interpolate;
use burn::tensor::ops::{InterpolateMode, InterpolateOptions};
use burn::tensor::{ElementConversion, Tensor};
use log::info;
use std::path::Path;

pub(crate) type AdamOf<B, M> = OptimizerAdaptor<Adam, M, B>;

/// Per-optimizer step counts. Texture and renderer advance every training
/// step; the discriminator only when its loss clears the skip threshold.
#[derive(Clone, Copy, Debug, Default)]
pub struct StepCounters {
    pub texture: u64,
    pub renderer: u64,
    pub discriminator: u64,
}

/// Scalars reported for one training step.
#[derive(Clone, Copy, Debug)]
pub struct TrainScalars {
    /// Combined generator objective (includes the adversarial term).
    pub loss: f32,
    pub loss_tex: f32,
    pub loss_img: f32,
    pub loss_vgg: f32,
    pub loss_g_adv: f32,
    /// Metric loss: reconstruction + texture-consistency + perceptual, no
    /// adversarial term.
    pub metric: f32,
    pub d_loss: f32,
    pub d_loss_real: f32,
    pub d_loss_fake: f32,
}

/// One forward pass through compositor and renderer, everything resized to
/// the configured image side.
pub struct RenderPass<Bx: Backend> {
    /// Composite network input `[B, T, C, S, S]`.
    pub network_input: Tensor<Bx, 5>,
    /// Rendered RGB `[B, T, 3, S, S]`, unclamped.
    pub rendered: Tensor<Bx, 5>,
    /// Ground-truth frames resized to `[B, T, 3, S, S]`.
    pub frames: Tensor<Bx, 5>,
}

fn resize5<Bx: Backend>(x: Tensor<Bx, 5>, size: usize) -> Tensor<Bx, 5> {
    let [b, t, c, h, w] = x.dims();
    if h == size && w == size {
        return x;
    }
    let out = interpolate(
        x.reshape([b * t, c, h, w]),
        [size, size],
        InterpolateOptions::new(InterpolateMode::Bilinear),
    );
    out.reshape([b, t, c, size, size])
}

/// Composites and renders one batch. Shared between training, validation and
/// preview paths; the caller picks the backend (autodiff or not) and the
/// textures (store gather or the fine-tuning scratch texture).
pub fn render_pass<Bx: Backend>(
    model: &ModelConfig,
    textures: Tensor<Bx, 4>,
    frames: Tensor<Bx, 5>,
    surfaces: &crate::data::AlignedSurfaces<Bx>,
    renderer: &Renderer<Bx>,
) -> RenderPass<Bx> {
    let [b, t, _, _, _] = frames.dims();
    let input = compositor::build(textures, frames.clone(), surfaces);
    let input = resize5(input, model.image_size);
    let frames = resize5(frames, model.image_size);

    let n = b * t;
    let [_, _, c, s, _] = input.dims();
    // TODO: condition on audio instead of the all-ones stub.
    let cond = Tensor::ones([n, model.cond_dim], &input.device());
    let rendered = renderer.forward(input.clone().reshape([n, c, s, s]), cond);

    RenderPass {
        network_input: input,
        rendered: rendered.reshape([b, t, 3, s, s]),
        frames,
    }
}

/// Owns the three parameter groups and their optimizers and drives the
/// manual training schedule: forward, conditional discriminator update on
/// detached output, then one generator backward stepping textures and
/// renderer together.
pub struct DubbingTrainer<B: AutodiffBackend> {
    pub model: ModelConfig,
    pub train: TrainConfig,
    pub device: B::Device,
    pub decoder: Box<dyn SurfaceDecoder<B::InnerBackend>>,
    pub textures: TextureStore<B>,
    pub renderer: Renderer<B>,
    pub discriminator: Discriminator<B>,
    pub perceptual: PerceptualNet<B>,
    pub steps: StepCounters,
    optim_texture: AdamOf<B, TextureStore<B>>,
    optim_renderer: AdamOf<B, Renderer<B>>,
    optim_discriminator: AdamOf<B, Discriminator<B>>,
    global_step: u64,
}

impl<B: AutodiffBackend> DubbingTrainer<B> {
    /// # Panics
    /// Will panic if the model config does not validate
    pub fn new(
        model: ModelConfig,
        train: TrainConfig,
        ids: &[String],
        decoder: Box<dyn SurfaceDecoder<B::InnerBackend>>,
        device: B::Device,
    ) -> Self {
        model.validate();
        B::seed(train.seed);
        let textures = TextureStore::with_noise(&model, ids, &device);
        let renderer = Renderer::init(&model, &device);
        let discriminator = Discriminator::init(&model, &device);
        let perceptual = PerceptualNet::init(&device);
        info!(
            "Initialised dubbing trainer: {} identities, image size {}",
            textures.len(),
            model.image_size
        );
        Self {
            model,
            train,
            device,
            decoder,
            textures,
            renderer,
            discriminator,
            perceptual,
            steps: StepCounters::default(),
            optim_texture: AdamConfig::new().init(),
            optim_renderer: AdamConfig::new().init(),
            optim_discriminator: AdamConfig::new().init(),
            global_step: 0,
        }
    }

    /// Loads fixed perceptual-loss weights; keeps random init with a warning
    /// when the path is absent.
    pub fn load_perceptual_weights(&mut self, path: Option<&Path>) -> Result<(), RecorderError> {
        self.perceptual = self.perceptual.clone().with_weights(path, &self.device)?;
        Ok(())
    }

    pub fn global_step(&self) -> u64 {
        self.global_step
    }

    /// Decode, warp/align, composite and render one batch on the autodiff
    /// backend. The decoder runs on the inner backend (it is an external,
    /// frozen collaborator); its maps are lifted carrying no gradients.
    pub fn forward_train(&self, batch: &FrameBatch<B>) -> RenderPass<B> {
        let flat = batch.params.flattened_inner();
        let maps = self.decoder.decode(&flat);
        let surfaces = align_surfaces(&maps, batch.frame_size()).autodiff::<B>();
        let textures = gather_textures(&self.textures, &batch.ids);
        render_pass(&self.model, textures, batch.frames.clone(), &surfaces, &self.renderer)
    }

    /// One joint training step: forward, discriminator update on the
    /// detached output, then the combined generator update.
    pub fn train_step(&mut self, batch: &FrameBatch<B>, sink: &mut dyn MetricSink) -> TrainScalars {
        self.global_step += 1;
        let pass = self.forward_train(batch);

        // The detach here is the only gradient-isolation boundary of the
        // step: no generator gradient may leak into the discriminator
        // update.
        let (d_loss, d_loss_real, d_loss_fake) =
            self.discriminator_step(pass.frames.clone(), pass.rendered.clone().detach());

        let fake_logits = self.discriminator.forward(stack_temporal(pass.rendered.clone()));
        let losses = generator_losses(
            &self.train,
            pass.rendered,
            pass.frames,
            pass.network_input,
            fake_logits,
            &self.perceptual,
        );

        // Textures and renderer share one backward pass; both contribute to
        // the same forward graph.
        let mut grads = losses.combined.clone().backward();
        let grads_tex = GradientsParams::from_module(&mut grads, &self.textures);
        let grads_ren = GradientsParams::from_module(&mut grads, &self.renderer);
        self.textures = self.optim_texture.step(self.train.lr_texture, self.textures.clone(), grads_tex);
        self.renderer = self.optim_renderer.step(self.train.lr_renderer, self.renderer.clone(), grads_ren);
        self.steps.texture += 1;
        self.steps.renderer += 1;

        let scalars = TrainScalars {
            loss: losses.combined.into_scalar().elem::<f32>(),
            loss_tex: losses.texture_consistency.into_scalar().elem::<f32>(),
            loss_img: losses.reconstruction.into_scalar().elem::<f32>(),
            loss_vgg: losses.perceptual.into_scalar().elem::<f32>(),
            loss_g_adv: losses.adversarial.into_scalar().elem::<f32>(),
            metric: losses.metric.into_scalar().elem::<f32>(),
            d_loss,
            d_loss_real,
            d_loss_fake,
        };
        self.emit(&scalars, sink);
        scalars
    }

    fn emit(&self, scalars: &TrainScalars, sink: &mut dyn MetricSink) {
        let step = self.global_step;
        sink.scalar("loss", scalars.loss, step);
        sink.scalar("loss_tex", scalars.loss_tex, step);
        sink.scalar("loss_img", scalars.loss_img, step);
        sink.scalar("loss_vgg", scalars.loss_vgg, step);
        sink.scalar("loss_G_adv", scalars.loss_g_adv, step);
        sink.scalar("D_loss", scalars.d_loss, step);
        sink.scalar("D_loss_real", scalars.d_loss_real, step);
        sink.scalar("D_loss_fake", scalars.d_loss_fake, step);
    }

    /// LSGAN discriminator update. The losses are always computed and
    /// reported, but parameters and optimizer state only move when the
    /// averaged loss clears the skip threshold; an already-confident
    /// discriminator stays put so the generator can catch up.
    fn discriminator_step(&mut self, frames: Tensor<B, 5>, rendered_detached: Tensor<B, 5>) -> (f32, f32, f32) {
        let real_logits = self.discriminator.forward(stack_temporal(frames));
        let fake_logits = self.discriminator.forward(stack_temporal(rendered_detached));
        let losses = discriminator_losses(real_logits, fake_logits);

        let d_real = losses.real.into_scalar().elem::<f32>();
        let d_fake = losses.fake.into_scalar().elem::<f32>();
        let d_total = losses.total.clone().into_scalar().elem::<f32>();

        if d_total > self.train.disc_skip_threshold {
            let grads = losses.total.mul_scalar(self.train.disc_loss_weight).backward();
            let grads = GradientsParams::from_grads(grads, &self.discriminator);
            self.discriminator =
                self.optim_discriminator
                    .step(self.train.lr_discriminator, self.discriminator.clone(), grads);
            self.steps.discriminator += 1;
        }
        (d_total, d_real, d_fake)
    }

    /// Same forward computation on the non-autodiff modules, no optimizer
    /// steps; validation loss is reconstruction + texture-consistency only.
    pub fn validation_step(&self, batch: &FrameBatch<B::InnerBackend>) -> ValLosses {
        let flat = batch.params.flattened();
        let maps = self.decoder.decode(&flat);
        let surfaces = align_surfaces(&maps, batch.frame_size());
        let textures_valid = self.textures.valid();
        let textures = gather_textures(&textures_valid, &batch.ids);
        let pass = render_pass(&self.model, textures, batch.frames.clone(), &surfaces, &self.renderer.valid());

        let [b, t, _, h, w] = pass.rendered.dims();
        let input_rgb = pass.network_input.slice([0..b, 0..t, 0..3, 0..h, 0..w]);
        let loss_tex = l1(input_rgb, pass.frames.clone()).into_scalar().elem::<f32>();
        let loss_img = l1(pass.rendered, pass.frames).into_scalar().elem::<f32>();
        ValLosses {
            loss: loss_tex + loss_img,
            loss_tex,
            loss_img,
        }
    }
}
