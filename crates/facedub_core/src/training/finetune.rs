//! Frozen-renderer identity fitting: a fresh texture is optimized in
//! isolation against a pretrained renderer, then inserted into the shared
//! store. The renderer and discriminator are never stepped here, so a new
//! identity costs nothing to the identities already trained.

use crate::data::FrameBatch;
use crate::metrics::MetricSink;
use crate::texture::TextureStore;
use crate::training::loss::l1;
use crate::training::trainer::{render_pass, DubbingTrainer};
use crate::warp::align_surfaces;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::ElementConversion;
use log::info;

impl<B: AutodiffBackend> DubbingTrainer<B> {
    /// Fits a fresh noise texture to the target identity's data over
    /// `finetune_epochs` passes and inserts it under `id`. Only
    /// reconstruction and texture-consistency drive the fit; there is no
    /// adversarial or perceptual term. The ad-hoc texture is used for every
    /// batch item regardless of its key, so unknown-identity lookups cannot
    /// occur on this path.
    ///
    /// # Panics
    /// Will panic if `id` is already in the store
    pub fn fit_new_identity(&mut self, id: &str, batches: &[FrameBatch<B>], sink: &mut dyn MetricSink) {
        assert!(
            !self.textures.contains(id),
            "Identity already in texture store: {id}"
        );

        // One single-entry store so the dedicated optimizer owns exactly the
        // new texture.
        let mut scratch = TextureStore::<B>::with_noise(&self.model, &[id.to_string()], &self.device);
        let mut optim = AdamConfig::new().init();
        let mut step: u64 = 0;

        info!("Fitting new identity {id} over {} epochs", self.train.finetune_epochs);
        for epoch in 0..self.train.finetune_epochs {
            for batch in batches {
                step += 1;
                let b = batch.batch_size();

                let flat = batch.params.flattened_inner();
                let maps = self.decoder.decode(&flat);
                let surfaces = align_surfaces(&maps, batch.frame_size()).autodiff::<B>();

                // The same ad-hoc texture backs every item in the batch.
                let textures = scratch.get(id).repeat_dim(0, b);
                let pass = render_pass(&self.model, textures, batch.frames.clone(), &surfaces, &self.renderer);

                let [bb, t, _, h, w] = pass.rendered.dims();
                let input_rgb = pass.network_input.slice([0..bb, 0..t, 0..3, 0..h, 0..w]);
                let loss_tex = l1(input_rgb, pass.frames.clone());
                let loss_img = l1(pass.rendered, pass.frames);
                let loss = loss_tex.clone() + loss_img.clone();

                let grads = loss.clone().backward();
                let grads = GradientsParams::from_grads(grads, &scratch);
                scratch = optim.step(self.train.lr_texture, scratch, grads);

                sink.scalar("finetune/loss", loss.into_scalar().elem::<f32>(), step);
                sink.scalar("finetune/loss_tex", loss_tex.into_scalar().elem::<f32>(), step);
                sink.scalar("finetune/loss_img", loss_img.into_scalar().elem::<f32>(), step);
            }
            info!("Finetune epoch {}/{} done for {id}", epoch + 1, self.train.finetune_epochs);
        }

        self.textures.insert(id, scratch.get(id).detach());
        info!("Inserted fitted texture for {id}");
    }
}
