use burn::config::Config;

/// Shared model geometry. Every channel/size coupling between the texture
/// store, the compositor and the renderer input goes through this one value
/// set, never through duplicated magic numbers.
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// Side length the network operates at. Must be divisible by 32 (five
    /// stride-2 levels in the renderer).
    #[config(default = 256)]
    pub image_size: usize,
    /// Spatial resolution of every neural texture.
    #[config(default = 256)]
    pub texture_size: usize,
    /// Channel count of every neural texture. The first 3 channels
    /// conventionally align with RGB for the texture-consistency loss.
    #[config(default = 8)]
    pub texture_channels: usize,
    /// Number of frames in one temporal window.
    #[config(default = 5)]
    pub temporal_window: usize,
    /// Width of the conditioning vector (audio pathway stub).
    #[config(default = 512)]
    pub cond_dim: usize,
    /// Base feature width of the renderer.
    #[config(default = 64)]
    pub renderer_features: usize,
    /// Base feature width of the discriminator.
    #[config(default = 64)]
    pub disc_features: usize,
}

impl ModelConfig {
    /// # Panics
    /// Will panic if the sizes are not usable by the renderer stack
    pub fn validate(&self) {
        assert!(
            self.image_size % 32 == 0,
            "image_size must be divisible by 32, got {}",
            self.image_size
        );
        assert!(
            self.texture_channels >= 3,
            "texture_channels must cover the RGB passthrough channels, got {}",
            self.texture_channels
        );
        assert!(self.temporal_window >= 1, "temporal_window must be at least 1");
    }
}

/// Training-loop knobs, one optimizer group per learning rate.
#[derive(Config, Debug)]
pub struct TrainConfig {
    #[config(default = 1e-3)]
    pub lr_texture: f64,
    #[config(default = 1e-4)]
    pub lr_renderer: f64,
    #[config(default = 1e-4)]
    pub lr_discriminator: f64,
    /// The discriminator optimizer only steps when its averaged LSGAN loss
    /// exceeds this, so an already-confident discriminator stops improving.
    #[config(default = 0.01)]
    pub disc_skip_threshold: f32,
    /// Scale applied to the discriminator loss before its backward pass.
    #[config(default = 0.02)]
    pub disc_loss_weight: f32,
    #[config(default = 1.0)]
    pub w_reconstruction: f32,
    #[config(default = 1.0)]
    pub w_texture_consistency: f32,
    #[config(default = 1.0)]
    pub w_perceptual: f32,
    #[config(default = 0.02)]
    pub w_adversarial: f32,
    /// Epochs of the frozen-renderer identity fitting loop.
    #[config(default = 10)]
    pub finetune_epochs: usize,
    /// Preview clips rendered per validation epoch.
    #[config(default = 3)]
    pub preview_clips: usize,
    #[config(default = 42)]
    pub seed: u64,
}
