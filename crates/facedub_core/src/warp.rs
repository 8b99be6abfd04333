//! Device-side entry point of the geometric warp. The actual resampling is
//! classical image warping on the host; data is moved off the compute device,
//! warped per sample, and moved back. Fully sequential within a step, so the
//! round trip has no synchronization hazard.

use crate::data::{AlignedSurfaces, CropTransform, SurfaceMaps};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use facedub_utils::bshare::{tensor_to_array4, ToBurn};
use facedub_utils::warp::warp_batch_into_frame;

/// Resamples a crop-space map `[N, c, h, w]` into frame space
/// `[N, c, img_size, img_size]`, one transform per sample.
///
/// Degenerate transforms do not fail the batch; the affected sample simply
/// comes out zero (see `facedub_utils::warp`).
///
/// # Panics
/// Will panic if the number of transforms does not match the batch size
pub fn warp_to_frame<B: Backend>(maps: Tensor<B, 4>, tforms: &[CropTransform], img_size: usize) -> Tensor<B, 4> {
    let device = maps.device();
    let host = tensor_to_array4(&maps);
    let matrices: Vec<_> = tforms.iter().map(|t| t.matrix).collect();
    let warped = warp_batch_into_frame(&host, &matrices, img_size);
    warped.to_burn(&device)
}

/// Warps the UV field and both masks into frame space with the same per-frame
/// transforms, keeping all three pixel-aligned with the raw frames. The UV
/// channels are moved last (`[N, S, S, 2]`) ready for texture sampling.
pub fn align_surfaces<B: Backend>(maps: &SurfaceMaps<B>, img_size: usize) -> AlignedSurfaces<B> {
    let uv = warp_to_frame(maps.uv.clone(), &maps.tforms, img_size);
    let inner = warp_to_frame(maps.inner_mask.clone(), &maps.tforms, img_size);
    let outer = warp_to_frame(maps.outer_mask.clone(), &maps.tforms, img_size);
    AlignedSurfaces {
        uv: uv.permute([0, 2, 3, 1]),
        inner,
        outer,
    }
}
