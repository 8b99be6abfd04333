//! End-to-end run on synthetic data: a few joint training steps over two
//! identities, a validation epoch, a preview render, a new-identity fit
//! against the frozen renderer and a checkpoint save. Everything runs on the
//! CPU ndarray backend so the demo needs no data or hardware.

use burn::backend::{Autodiff, NdArray};
use burn::tensor::backend::Backend;
use burn::tensor::{Distribution, Tensor};
use facedub::facedub_core::config::{ModelConfig, TrainConfig};
use facedub::facedub_core::data::{
    CropTransform, FrameBatch, PreviewSource, ReconParams, SurfaceDecoder, SurfaceMaps,
};
use facedub::facedub_core::metrics::{write_preview_frames, LogSink, MetricSink};
use facedub::facedub_core::training::checkpoint;
use facedub::facedub_core::training::eval::{render_preview, EvalReporter};
use facedub::facedub_core::training::DubbingTrainer;
use log::info;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

type Inner = NdArray<f32>;
type B = Autodiff<Inner>;

/// Stand-in for the 3D reconstruction module: an identity UV grid plus fixed
/// soft radial masks, one per flattened frame.
struct SyntheticDecoder {
    size: usize,
    device: <Inner as Backend>::Device,
}

impl SyntheticDecoder {
    fn radial_mask(&self, radius: f32, soft: f32) -> Vec<f32> {
        let s = self.size;
        let mut mask = Vec::with_capacity(s * s);
        for y in 0..s {
            for x in 0..s {
                let dx = (x as f32 + 0.5) / s as f32 - 0.5;
                let dy = (y as f32 + 0.5) / s as f32 - 0.5;
                let d = (dx * dx + dy * dy).sqrt();
                mask.push(((radius - d) / soft).clamp(0.0, 1.0));
            }
        }
        mask
    }
}

impl SurfaceDecoder<Inner> for SyntheticDecoder {
    fn decode(&self, params: &HashMap<String, Tensor<Inner, 2>>) -> SurfaceMaps<Inner> {
        let n = params.values().next().expect("At least one code").dims()[0];
        let s = self.size;

        let uv = facedub::facedub_core::compositor::identity_uv_grid::<Inner>(n, s, &self.device)
            .permute([0, 3, 1, 2]);
        let inner = Tensor::<Inner, 1>::from_floats(self.radial_mask(0.30, 0.08).as_slice(), &self.device)
            .reshape([1, 1, s, s])
            .repeat_dim(0, n);
        let outer = Tensor::<Inner, 1>::from_floats(self.radial_mask(0.42, 0.08).as_slice(), &self.device)
            .reshape([1, 1, s, s])
            .repeat_dim(0, n);

        SurfaceMaps {
            uv,
            inner_mask: inner,
            outer_mask: outer,
            tforms: vec![CropTransform::identity(); n],
        }
    }
}

fn synthetic_batch<Bx: Backend>(model: &ModelConfig, ids: &[&str], device: &Bx::Device) -> FrameBatch<Bx> {
    let b = ids.len();
    let t = model.temporal_window;
    let s = model.image_size;
    let frames = Tensor::random([b, t, 3, s, s], Distribution::Uniform(0.0, 1.0), device);
    let mut codes = HashMap::new();
    codes.insert(
        "expcode".to_string(),
        Tensor::random([b, t, 16], Distribution::Normal(0.0, 1.0), device),
    );
    FrameBatch::new(frames, ReconParams::new(codes), ids.iter().map(|s| (*s).to_string()).collect())
}

struct SyntheticClip {
    batches: Vec<FrameBatch<Inner>>,
}

impl PreviewSource<Inner> for SyntheticClip {
    fn num_frames(&self) -> usize {
        self.batches.len()
    }

    fn frame_at(&self, index: usize) -> FrameBatch<Inner> {
        self.batches[index].clone()
    }
}

fn main() {
    env_logger::init();
    let device = Default::default();

    let model = ModelConfig::new()
        .with_image_size(64)
        .with_texture_size(64)
        .with_texture_channels(4)
        .with_temporal_window(3)
        .with_cond_dim(16)
        .with_renderer_features(8)
        .with_disc_features(8);
    let train = TrainConfig::new().with_finetune_epochs(2);

    let ids = vec!["anna".to_string(), "ben".to_string()];
    let decoder = SyntheticDecoder {
        size: model.image_size,
        device,
    };
    let mut trainer = DubbingTrainer::<B>::new(model.clone(), train, &ids, Box::new(decoder), device);
    let mut sink = LogSink;

    info!("Joint training");
    for _ in 0..4 {
        let batch = synthetic_batch::<B>(&model, &["anna", "ben"], &device);
        let scalars = trainer.train_step(&batch, &mut sink);
        info!(
            "step {}: loss {:.4}, D {:.4} (texture {} / renderer {} / discriminator {} steps)",
            trainer.global_step(),
            scalars.loss,
            scalars.d_loss,
            trainer.steps.texture,
            trainer.steps.renderer,
            trainer.steps.discriminator
        );
    }

    info!("Validation");
    let mut reporter = EvalReporter::new();
    for _ in 0..2 {
        let batch = synthetic_batch::<Inner>(&model, &["anna"], &device);
        reporter.observe(trainer.validation_step(&batch));
    }
    reporter.finish(&mut sink, trainer.global_step());

    info!("Preview");
    let clip = SyntheticClip {
        batches: (0..trainer.train.preview_clips)
            .map(|_| synthetic_batch::<Inner>(&model, &["anna"], &device))
            .collect(),
    };
    let video = render_preview(&trainer, &clip);
    sink.video("preview_0", &video, trainer.global_step());
    let out_dir = Path::new("out/previews");
    fs::create_dir_all(out_dir).expect("Preview directory is writable");
    write_preview_frames(&video, out_dir, "epoch0").expect("Preview frames are writable");

    info!("New-identity fit");
    let finetune_batches = vec![synthetic_batch::<B>(&model, &["carl"], &device)];
    trainer.fit_new_identity("carl", &finetune_batches, &mut sink);
    info!("Store now holds {} identities", trainer.textures.len());

    info!("Checkpoints");
    let ckpt_dir = Path::new("out/checkpoints");
    fs::create_dir_all(ckpt_dir).expect("Checkpoint directory is writable");
    checkpoint::save_renderer(&trainer.renderer, &ckpt_dir.join("renderer")).expect("Renderer saves");
    checkpoint::save_discriminator(&trainer.discriminator, &ckpt_dir.join("discriminator"))
        .expect("Discriminator saves");
    checkpoint::save_textures(&trainer.textures, &ckpt_dir.join("textures")).expect("Texture store saves");
    info!("Done");
}
