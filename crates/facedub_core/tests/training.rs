//! End-to-end training-schedule tests on a small synthetic setup: step
//! ordering, the discriminator update-skip, the detach boundary between
//! generator and discriminator updates, frozen-renderer identity fitting and
//! preview rendering.

use burn::backend::{Autodiff, NdArray};
use burn::optim::GradientsParams;
use burn::tensor::backend::Backend;
use burn::tensor::{Distribution, Tensor};
use facedub_core::compositor::identity_uv_grid;
use facedub_core::config::{ModelConfig, TrainConfig};
use facedub_core::data::{
    CropTransform, FrameBatch, PreviewSource, ReconParams, SurfaceDecoder, SurfaceMaps,
};
use facedub_core::metrics::MetricSink;
use facedub_core::renderer::stack_temporal;
use facedub_core::training::eval::render_preview;
use facedub_core::training::loss::lsgan;
use facedub_core::training::DubbingTrainer;
use std::collections::HashMap;

type Inner = NdArray<f32>;
type TestBackend = Autodiff<Inner>;

struct GridDecoder {
    size: usize,
}

impl SurfaceDecoder<Inner> for GridDecoder {
    fn decode(&self, params: &HashMap<String, Tensor<Inner, 2>>) -> SurfaceMaps<Inner> {
        let n = params.values().next().unwrap().dims()[0];
        let s = self.size;
        let device = Default::default();
        let half = Tensor::<Inner, 4>::ones([n, 1, s, s], &device).mul_scalar(0.5);
        SurfaceMaps {
            uv: identity_uv_grid::<Inner>(n, s, &device).permute([0, 3, 1, 2]),
            inner_mask: half.clone(),
            outer_mask: half.mul_scalar(1.5),
            tforms: vec![CropTransform::identity(); n],
        }
    }
}

#[derive(Default)]
struct RecordingSink {
    scalars: Vec<(String, f32, u64)>,
}

impl MetricSink for RecordingSink {
    fn scalar(&mut self, name: &str, value: f32, step: u64) {
        self.scalars.push((name.to_string(), value, step));
    }
}

impl RecordingSink {
    fn names(&self) -> Vec<&str> {
        self.scalars.iter().map(|(name, _, _)| name.as_str()).collect()
    }
}

fn small_model() -> ModelConfig {
    ModelConfig::new()
        .with_image_size(32)
        .with_texture_size(16)
        .with_texture_channels(4)
        .with_temporal_window(3)
        .with_cond_dim(8)
        .with_renderer_features(4)
        .with_disc_features(4)
}

fn make_trainer(train: TrainConfig) -> DubbingTrainer<TestBackend> {
    let model = small_model();
    let decoder = GridDecoder { size: model.image_size };
    let ids = vec!["anna".to_string(), "ben".to_string()];
    DubbingTrainer::new(model, train, &ids, Box::new(decoder), Default::default())
}

fn batch<Bx: Backend>(model: &ModelConfig, ids: &[&str], device: &Bx::Device) -> FrameBatch<Bx> {
    let b = ids.len();
    let t = model.temporal_window;
    let s = model.image_size;
    let frames = Tensor::random([b, t, 3, s, s], Distribution::Uniform(0.0, 1.0), device);
    let mut codes = HashMap::new();
    codes.insert(
        "expcode".to_string(),
        Tensor::random([b, t, 8], Distribution::Normal(0.0, 1.0), device),
    );
    FrameBatch::new(frames, ReconParams::new(codes), ids.iter().map(|s| (*s).to_string()).collect())
}

#[test]
fn train_step_runs_the_full_schedule() {
    let mut trainer = make_trainer(TrainConfig::new());
    let model = trainer.model.clone();
    let mut sink = RecordingSink::default();

    let pass = trainer.forward_train(&batch::<TestBackend>(&model, &["anna", "ben"], &trainer.device.clone()));
    assert_eq!(pass.rendered.dims(), [2, 3, 3, 32, 32]);
    assert_eq!(pass.network_input.dims(), [2, 3, 4, 32, 32]);

    let scalars = trainer.train_step(&batch::<TestBackend>(&model, &["anna", "ben"], &trainer.device.clone()), &mut sink);
    for value in [
        scalars.loss,
        scalars.loss_tex,
        scalars.loss_img,
        scalars.loss_vgg,
        scalars.loss_g_adv,
        scalars.d_loss,
        scalars.d_loss_real,
        scalars.d_loss_fake,
    ] {
        assert!(value.is_finite());
    }

    assert_eq!(trainer.steps.texture, 1);
    assert_eq!(trainer.steps.renderer, 1);
    let expect_d = u64::from(scalars.d_loss > trainer.train.disc_skip_threshold);
    assert_eq!(trainer.steps.discriminator, expect_d);
    assert_eq!(trainer.global_step(), 1);

    let names = sink.names();
    for name in [
        "loss",
        "loss_tex",
        "loss_img",
        "loss_vgg",
        "loss_G_adv",
        "D_loss",
        "D_loss_real",
        "D_loss_fake",
    ] {
        assert!(names.contains(&name), "missing scalar {name}");
    }
}

#[test]
fn discriminator_update_skips_below_threshold() {
    let mut sink = RecordingSink::default();

    // An unreachable threshold: losses are still reported, no step happens
    // and the discriminator parameters stay exactly where they were.
    let mut trainer = make_trainer(TrainConfig::new().with_disc_skip_threshold(f32::INFINITY));
    let model = trainer.model.clone();
    let stack = Tensor::<TestBackend, 4>::random(
        [1, 3 * model.temporal_window, model.image_size, model.image_size],
        Distribution::Normal(0.0, 1.0),
        &trainer.device.clone(),
    );
    let logits_before = trainer.discriminator.forward(stack.clone()).to_data().to_vec::<f32>().unwrap();
    let scalars = trainer.train_step(&batch::<TestBackend>(&model, &["anna"], &trainer.device.clone()), &mut sink);
    assert_eq!(trainer.steps.discriminator, 0);
    assert!(scalars.d_loss.is_finite());
    assert!(sink.names().contains(&"D_loss"));
    let logits_after = trainer.discriminator.forward(stack).to_data().to_vec::<f32>().unwrap();
    assert_eq!(logits_before, logits_after);

    // A threshold below zero: the averaged squared-error loss always clears it.
    let mut trainer = make_trainer(TrainConfig::new().with_disc_skip_threshold(-1.0));
    let model = trainer.model.clone();
    trainer.train_step(&batch::<TestBackend>(&model, &["anna"], &trainer.device.clone()), &mut sink);
    assert_eq!(trainer.steps.discriminator, 1);
}

#[test]
fn detached_render_carries_no_generator_gradients() {
    let trainer = make_trainer(TrainConfig::new());
    let model = trainer.model.clone();
    let pass = trainer.forward_train(&batch::<TestBackend>(&model, &["anna"], &trainer.device.clone()));

    let fake_logits = trainer.discriminator.forward(stack_temporal(pass.rendered.detach()));
    let mut grads = lsgan(fake_logits, 0.0).backward();

    let for_renderer = GradientsParams::from_module(&mut grads, &trainer.renderer);
    let for_textures = GradientsParams::from_module(&mut grads, &trainer.textures);
    let for_discriminator = GradientsParams::from_module(&mut grads, &trainer.discriminator);
    assert_eq!(for_renderer.len(), 0);
    assert_eq!(for_textures.len(), 0);
    assert!(for_discriminator.len() > 0);
}

#[test]
fn identity_fitting_leaves_shared_modules_untouched() {
    let mut trainer = make_trainer(TrainConfig::new().with_finetune_epochs(2));
    let model = trainer.model.clone();
    let mut sink = RecordingSink::default();

    let val_batch = batch::<Inner>(&model, &["anna"], &trainer.device.clone());
    let before = trainer.validation_step(&val_batch);
    let disc_stack = Tensor::<TestBackend, 4>::random(
        [1, 3 * model.temporal_window, model.image_size, model.image_size],
        Distribution::Normal(0.0, 1.0),
        &trainer.device.clone(),
    );
    let disc_before = trainer.discriminator.forward(disc_stack.clone()).to_data().to_vec::<f32>().unwrap();

    let fit_batches = vec![batch::<TestBackend>(&model, &["carl"], &trainer.device.clone())];
    trainer.fit_new_identity("carl", &fit_batches, &mut sink);

    assert_eq!(trainer.textures.len(), 3);
    assert!(trainer.textures.contains("carl"));

    // Renderer and the pre-existing textures are bit-identical, so the same
    // validation batch reproduces the same losses exactly.
    let after = trainer.validation_step(&val_batch);
    assert_eq!(before.loss, after.loss);
    assert_eq!(before.loss_tex, after.loss_tex);
    assert_eq!(before.loss_img, after.loss_img);

    // The discriminator is never part of the fitting loop either.
    let disc_after = trainer.discriminator.forward(disc_stack).to_data().to_vec::<f32>().unwrap();
    assert_eq!(disc_before, disc_after);

    let names = sink.names();
    for name in ["finetune/loss", "finetune/loss_tex", "finetune/loss_img"] {
        assert!(names.contains(&name), "missing scalar {name}");
    }
}

struct ConstantClip {
    model: ModelConfig,
    frames: usize,
}

impl PreviewSource<Inner> for ConstantClip {
    fn num_frames(&self) -> usize {
        self.frames
    }

    fn frame_at(&self, _index: usize) -> FrameBatch<Inner> {
        let t = self.model.temporal_window;
        let s = self.model.image_size;
        let device = Default::default();
        let frames = Tensor::<Inner, 5>::ones([1, t, 3, s, s], &device).mul_scalar(0.5);
        let mut codes = HashMap::new();
        codes.insert("expcode".to_string(), Tensor::zeros([1, t, 8], &device));
        FrameBatch::new(frames, ReconParams::new(codes), vec!["anna".to_string()])
    }
}

#[test]
fn preview_lays_real_and_rendered_side_by_side() {
    let trainer = make_trainer(TrainConfig::new());
    let clip = ConstantClip {
        model: trainer.model.clone(),
        frames: 2,
    };
    let video = render_preview(&trainer, &clip);

    let s = trainer.model.image_size;
    assert_eq!(video.width, 2 * s);
    assert_eq!(video.height, s);
    assert_eq!(video.frames.len(), 2);
    for frame in &video.frames {
        assert_eq!(frame.len(), video.width * video.height * 3);
        // Left half is the real frame: constant 0.5 scaled to 8-bit.
        for y in 0..s {
            for x in 0..s {
                for ch in 0..3 {
                    assert_eq!(frame[(y * video.width + x) * 3 + ch], 127);
                }
            }
        }
    }
}
