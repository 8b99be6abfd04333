//! Rendering-and-training engine for neural-texture face dubbing.
//!
//! A per-identity neural texture is rasterized through a predicted surface
//! correspondence field, composited into the real frame, and decoded by a
//! conditional renderer. Training interleaves three optimizer groups
//! (textures, renderer, discriminator) under a manual schedule; a separate
//! fine-tuning path fits a fresh texture against a frozen renderer.

pub mod compositor;
pub mod config;
pub mod data;
pub mod metrics;
pub mod renderer;
pub mod texture;
pub mod training;
pub mod warp;
