#![deny(missing_docs)]
//! ## Crate Items Overview
//!
//! This section provides quick links to the main items in facedub-rs.
//!
//! ### Modules
//! - [`facedub_core`](crate::facedub_core) - The rendering-and-training engine: texture store, compositor, renderer, discriminator, losses and the training scheduler.
//! - [`facedub_utils`](crate::facedub_utils) - Utility functions and helpers: host-side image warping and ndarray/tensor conversion.
//!
//! ## Demos
//! The `demos/` folder of the repository contains runnable entry points; see
//! `demos/train_synthetic` for a self-contained training loop on synthetic
//! data.
pub use facedub_core;
pub use facedub_utils;
