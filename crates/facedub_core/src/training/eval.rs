use crate::compositor::gather_textures;
use crate::data::PreviewSource;
use crate::metrics::{MetricSink, PreviewVideo};
use crate::training::loss::ValLosses;
use crate::training::trainer::{render_pass, DubbingTrainer};
use crate::warp::align_surfaces;
use burn::module::AutodiffModule;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::Tensor;
use log::info;

/// Accumulates per-step validation losses across an epoch and reports the
/// means at epoch end.
#[derive(Debug, Default)]
pub struct EvalReporter {
    sum: ValLosses,
    count: usize,
}

impl EvalReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, losses: ValLosses) {
        self.sum.loss += losses.loss;
        self.sum.loss_tex += losses.loss_tex;
        self.sum.loss_img += losses.loss_img;
        self.count += 1;
    }

    /// Logs the epoch means under `val_*` and resets the accumulator.
    /// Returns the means, or `None` when nothing was observed.
    pub fn finish(&mut self, sink: &mut dyn MetricSink, step: u64) -> Option<ValLosses> {
        if self.count == 0 {
            return None;
        }
        let n = self.count as f32;
        let means = ValLosses {
            loss: self.sum.loss / n,
            loss_tex: self.sum.loss_tex / n,
            loss_img: self.sum.loss_img / n,
        };
        sink.scalar("val_loss", means.loss, step);
        sink.scalar("val_loss_tex", means.loss_tex, step);
        sink.scalar("val_loss_img", means.loss_img, step);
        info!("Validation epoch: loss {:.5} (tex {:.5}, img {:.5})", means.loss, means.loss_tex, means.loss_img);
        *self = Self::default();
        Some(means)
    }
}

/// Renders a preview sequence without autodiff: for every source frame the
/// middle frame of the temporal window is taken, real and rendered are laid
/// side by side, clipped to [0, 1] and scaled to 8-bit.
pub fn render_preview<B: AutodiffBackend>(
    trainer: &DubbingTrainer<B>,
    source: &dyn PreviewSource<B::InnerBackend>,
) -> PreviewVideo {
    let textures_valid = trainer.textures.valid();
    let renderer_valid = trainer.renderer.valid();

    let mut frames_out = Vec::with_capacity(source.num_frames());
    let mut width = 0;
    let mut height = 0;

    for idx in 0..source.num_frames() {
        let batch = source.frame_at(idx);
        assert!(batch.batch_size() == 1, "Preview batches must have batch size 1");

        let flat = batch.params.flattened();
        let maps = trainer.decoder.decode(&flat);
        let surfaces = align_surfaces(&maps, batch.frame_size());
        let textures = gather_textures(&textures_valid, &batch.ids);
        let pass = render_pass(&trainer.model, textures, batch.frames.clone(), &surfaces, &renderer_valid);

        let [_, t, _, s, _] = pass.rendered.dims();
        let mid = t / 2;
        let real: Tensor<B::InnerBackend, 3> = pass.frames.slice([0..1, mid..mid + 1, 0..3, 0..s, 0..s]).reshape([3, s, s]);
        let fake: Tensor<B::InnerBackend, 3> = pass.rendered.slice([0..1, mid..mid + 1, 0..3, 0..s, 0..s]).reshape([3, s, s]);

        // real|rendered side by side, channels-last, clipped and scaled.
        let pair = Tensor::cat(vec![real, fake], 2).permute([1, 2, 0]);
        let bytes: Vec<u8> = pair
            .clamp(0.0, 1.0)
            .mul_scalar(255.0)
            .to_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .expect("Preview frame reads back as f32")
            .iter()
            .map(|v| *v as u8)
            .collect();

        width = 2 * s;
        height = s;
        frames_out.push(bytes);
    }

    PreviewVideo {
        width,
        height,
        frames: frames_out,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::LogSink;

    #[test]
    fn reporter_means_and_resets() {
        let mut reporter = EvalReporter::new();
        reporter.observe(ValLosses { loss: 1.0, loss_tex: 0.4, loss_img: 0.6 });
        reporter.observe(ValLosses { loss: 3.0, loss_tex: 1.6, loss_img: 1.4 });
        let means = reporter.finish(&mut LogSink, 10).unwrap();
        assert!((means.loss - 2.0).abs() < 1e-6);
        assert!((means.loss_tex - 1.0).abs() < 1e-6);
        assert!((means.loss_img - 1.0).abs() < 1e-6);
        assert!(reporter.finish(&mut LogSink, 11).is_none());
    }
}
