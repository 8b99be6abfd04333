use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::Tensor;
use nalgebra as na;
use std::collections::HashMap;

/// Per-frame similarity/affine mapping from frame-space pixel coordinates to
/// the reconstruction module's crop space. This is the inverse-map convention
/// used to place the crop back into the frame, so the same matrix drives the
/// resampling of UV maps and masks.
#[derive(Clone, Debug)]
pub struct CropTransform {
    pub matrix: na::Matrix3<f32>,
}

impl CropTransform {
    pub fn new(matrix: na::Matrix3<f32>) -> Self {
        Self { matrix }
    }

    pub fn identity() -> Self {
        Self {
            matrix: na::Matrix3::identity(),
        }
    }
}

/// Opaque reconstruction codes (shape/expression/pose etc.), one named tensor
/// of shape `[B, T, D]` per code. The core never interprets them; it only
/// flattens the batch/time dimensions before handing them to the decoder.
#[derive(Clone, Debug)]
pub struct ReconParams<B: Backend> {
    pub codes: HashMap<String, Tensor<B, 3>>,
}

impl<B: Backend> ReconParams<B> {
    pub fn new(codes: HashMap<String, Tensor<B, 3>>) -> Self {
        Self { codes }
    }

    /// Flattens every code from `[B, T, D]` to `[B * T, D]`.
    pub fn flattened(&self) -> HashMap<String, Tensor<B, 2>> {
        self.codes
            .iter()
            .map(|(name, code)| (name.clone(), code.clone().flatten(0, 1)))
            .collect()
    }
}

impl<B: AutodiffBackend> ReconParams<B> {
    /// Flattened codes on the inner (non-autodiff) backend; the decoder is an
    /// external frozen collaborator and never takes gradients.
    pub fn flattened_inner(&self) -> HashMap<String, Tensor<B::InnerBackend, 2>> {
        self.codes
            .iter()
            .map(|(name, code)| (name.clone(), code.clone().inner().flatten(0, 1)))
            .collect()
    }
}

/// A temporal window of `T` frames for each of `B` clips.
///
/// Invariant: all `T` frames of one batch item belong to the identity named
/// at the same index of `ids`.
#[derive(Clone, Debug)]
pub struct FrameBatch<B: Backend> {
    /// RGB frames `[B, T, 3, H, W]`, values in [0, 1].
    pub frames: Tensor<B, 5>,
    pub params: ReconParams<B>,
    /// One identity key per batch item.
    pub ids: Vec<String>,
}

impl<B: Backend> FrameBatch<B> {
    /// # Panics
    /// Will panic if the identity list does not line up with the batch
    pub fn new(frames: Tensor<B, 5>, params: ReconParams<B>, ids: Vec<String>) -> Self {
        let [b, _t, c, _h, _w] = frames.dims();
        assert!(
            ids.len() == b,
            "One identity per batch item is required: {} identities for batch of {b}",
            ids.len()
        );
        assert!(c == 3, "Frames must be RGB, got {c} channels");
        Self { frames, params, ids }
    }

    pub fn batch_size(&self) -> usize {
        self.frames.dims()[0]
    }

    pub fn window_len(&self) -> usize {
        self.frames.dims()[1]
    }

    pub fn frame_size(&self) -> usize {
        self.frames.dims()[4]
    }
}

/// Raw per-frame output of the external reconstruction module, in its crop
/// space, for `N = B * T` flattened frames.
#[derive(Clone, Debug)]
pub struct SurfaceMaps<B: Backend> {
    /// UV correspondence field `[N, 2, h', w']`, normalized to [-1, 1].
    pub uv: Tensor<B, 4>,
    /// Soft mask `[N, 1, h', w']` of the region the texture fully determines.
    pub inner_mask: Tensor<B, 4>,
    /// Soft mask `[N, 1, h', w']` of the full replaceable region.
    pub outer_mask: Tensor<B, 4>,
    /// One frame-to-crop (inverse-map) transform per flattened frame.
    pub tforms: Vec<CropTransform>,
}

/// Frame-space, pixel-aligned surfaces for `N = B * T` flattened frames. All
/// three maps were warped by the same per-frame transform, so they stay
/// aligned with the raw frames by construction.
#[derive(Clone, Debug)]
pub struct AlignedSurfaces<B: Backend> {
    /// Sampling coordinates `[N, S, S, 2]`, normalized to [-1, 1].
    pub uv: Tensor<B, 4>,
    /// Inner mask `[N, 1, S, S]`.
    pub inner: Tensor<B, 4>,
    /// Outer mask `[N, 1, S, S]`.
    pub outer: Tensor<B, 4>,
}

impl<B: Backend> AlignedSurfaces<B> {
    /// Lifts the surfaces into an autodiff backend. They carry no gradients
    /// of their own; only the texture raster sampled through them does.
    pub fn autodiff<AB: AutodiffBackend<InnerBackend = B>>(self) -> AlignedSurfaces<AB> {
        AlignedSurfaces {
            uv: Tensor::from_inner(self.uv),
            inner: Tensor::from_inner(self.inner),
            outer: Tensor::from_inner(self.outer),
        }
    }
}

/// Interface of the external 3D face-reconstruction module: flattened
/// per-frame codes in, crop-space UV/masks and crop transforms out. Internals
/// are out of scope for this crate.
pub trait SurfaceDecoder<B: Backend> {
    fn decode(&self, params: &HashMap<String, Tensor<B, 2>>) -> SurfaceMaps<B>;
}

/// Narrow preview interface a data source exposes: frame-indexed access to
/// single-item batches, used only for rendering preview sequences.
pub trait PreviewSource<B: Backend> {
    fn num_frames(&self) -> usize;

    /// Returns a batch with `batch_size == 1` for the given frame index.
    fn frame_at(&self, index: usize) -> FrameBatch<B>;
}
