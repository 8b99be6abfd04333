pub mod adain;
pub mod discriminator;
pub mod perceptual;
pub mod unet;

pub use adain::AdaIn;
pub use discriminator::{stack_temporal, Discriminator};
pub use perceptual::PerceptualNet;
pub use unet::Renderer;
