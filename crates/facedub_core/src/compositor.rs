//! Builds the renderer input: per-identity textures are gathered, bilinearly
//! rasterized through the frame-space UV field, and blended with the raw
//! frame by the inner/outer masks. Inside the inner mask the learned texture
//! fully determines the face; wherever the outer mask is zero the raw frame
//! passes through unmodified; the band in between is a soft arithmetic blend
//! resolved by the soft-edged masks coming from upstream.

use crate::data::AlignedSurfaces;
use crate::texture::TextureStore;
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};

/// Resolves one texture per batch item, `[B, C, S_tex, S_tex]`.
///
/// # Panics
/// Will panic if an identity is missing from the store
pub fn gather_textures<B: Backend>(store: &TextureStore<B>, ids: &[String]) -> Tensor<B, 4> {
    let per_item: Vec<_> = ids.iter().map(|id| store.get(id)).collect();
    Tensor::cat(per_item, 0)
}

/// Broadcasts `[B, C, S, S]` textures across a temporal window of length `t`,
/// flattened to `[B * t, C, S, S]`.
pub fn broadcast_time<B: Backend>(textures: Tensor<B, 4>, t: usize) -> Tensor<B, 4> {
    let [b, c, s, s2] = textures.dims();
    textures.reshape([b, 1, c, s, s2]).repeat_dim(1, t).reshape([b * t, c, s, s2])
}

/// Replaces non-finite coordinates with a far out-of-range value so they fail
/// the in-bounds test and sample to zero. `x * 0 != 0` exactly for NaN/Inf.
fn scrub_coords<B: Backend>(coords: Tensor<B, 2>, extent: usize) -> Tensor<B, 2> {
    let bad = coords.clone().mul_scalar(0.0).not_equal_elem(0.0);
    coords.mask_fill(bad, -2.0 * extent as f32)
}

/// Bilinearly samples `texture [N, C, S, S]` at normalized coordinates
/// `uv [N, H, W, 2]` in [-1, 1] (align_corners = false), zero outside the
/// valid range. Differentiable w.r.t. the texture through the four gathers;
/// the UV field itself is treated as data.
///
/// # Panics
/// Will panic if the texture is not square or the batch sizes disagree
pub fn sample_texture<B: Backend>(texture: Tensor<B, 4>, uv: Tensor<B, 4>) -> Tensor<B, 4> {
    let [n, c, s, s2] = texture.dims();
    let [n_uv, h, w, two] = uv.dims();
    assert!(s == s2, "Texture must be square, got {s}x{s2}");
    assert!(two == 2, "UV field must have 2 coordinate channels, got {two}");
    assert!(n == n_uv, "Texture/UV batch mismatch: {n} != {n_uv}");

    let uv = uv.reshape([n, h * w, 2]);
    let u = scrub_coords(uv.clone().slice([0..n, 0..h * w, 0..1]).squeeze(2), s);
    let v = scrub_coords(uv.slice([0..n, 0..h * w, 1..2]).squeeze(2), s);

    // Continuous source pixel coordinates, align_corners = false.
    let x = u.add_scalar(1.0).mul_scalar(s as f32 / 2.0).sub_scalar(0.5);
    let y = v.add_scalar(1.0).mul_scalar(s as f32 / 2.0).sub_scalar(0.5);

    let x0f = x.clone().floor();
    let y0f = y.clone().floor();
    let wx = x - x0f.clone();
    let wy = y - y0f.clone();
    let x0: Tensor<B, 2, Int> = x0f.int();
    let y0: Tensor<B, 2, Int> = y0f.int();

    let one_minus_wx = wx.clone().mul_scalar(-1.0).add_scalar(1.0);
    let one_minus_wy = wy.clone().mul_scalar(-1.0).add_scalar(1.0);

    let tex_flat = texture.reshape([n, c, s * s]);
    let corners = [
        (0, 0, one_minus_wx.clone() * one_minus_wy.clone()),
        (1, 0, wx.clone() * one_minus_wy),
        (0, 1, one_minus_wx * wy.clone()),
        (1, 1, wx * wy),
    ];

    let mut acc: Option<Tensor<B, 3>> = None;
    for (dx, dy, weight) in corners {
        let xi = x0.clone().add_scalar(dx);
        let yi = y0.clone().add_scalar(dy);
        // Zero padding: out-of-bounds corners contribute nothing.
        let in_x = xi.clone().greater_equal_elem(0).float() * xi.clone().lower_elem(s as i32).float();
        let in_y = yi.clone().greater_equal_elem(0).float() * yi.clone().lower_elem(s as i32).float();
        let flat = yi.clamp(0, (s - 1) as i32).mul_scalar(s as i32) + xi.clamp(0, (s - 1) as i32);
        let gathered = tex_flat.clone().gather(2, flat.reshape([n, 1, h * w]).repeat_dim(1, c));
        let weight = (weight * in_x * in_y).reshape([n, 1, h * w]);
        let term = gathered * weight;
        acc = Some(match acc {
            Some(prev) => prev + term,
            None => term,
        });
    }
    acc.expect("At least one corner contributes").reshape([n, c, h, w])
}

/// Builds the network input `[B, T, C, H, W]` from gathered textures
/// `[B, C, S_tex, S_tex]`, raw frames `[B, T, 3, H, W]` and frame-aligned
/// surfaces: `input = raster * inner + frame_pad * (1 - outer)`.
///
/// # Panics
/// Will panic if the surfaces are not aligned with the frames
pub fn build<B: Backend>(textures: Tensor<B, 4>, frames: Tensor<B, 5>, surfaces: &AlignedSurfaces<B>) -> Tensor<B, 5> {
    let [b, t, _, h, w] = frames.dims();
    let [_, c, _, _] = textures.dims();
    let n = b * t;
    assert!(h == w, "Frames must be square, got {h}x{w}");
    assert!(
        surfaces.uv.dims() == [n, h, w, 2],
        "UV field is not aligned with the frames: {:?} != [{n}, {h}, {w}, 2]",
        surfaces.uv.dims()
    );
    assert!(
        surfaces.inner.dims() == [n, 1, h, w] && surfaces.outer.dims() == surfaces.inner.dims(),
        "Masks are not aligned with the frames"
    );

    let raster = sample_texture(broadcast_time(textures, t), surfaces.uv.clone());

    let frames_flat = frames.reshape([n, 3, h, w]);
    let device = frames_flat.device();
    let pad = Tensor::zeros([n, c - 3, h, w], &device);
    let frames_pad = Tensor::cat(vec![frames_flat, pad], 1);

    let keep_frame = surfaces.outer.clone().mul_scalar(-1.0).add_scalar(1.0);
    let input = raster * surfaces.inner.clone() + frames_pad * keep_frame;
    input.reshape([b, t, c, h, w])
}

/// Normalized sampling grid that reads a `size`-sided texture back pixel for
/// pixel (align_corners = false). Convenience for synthetic decoders.
pub fn identity_uv_grid<B: Backend>(n: usize, size: usize, device: &B::Device) -> Tensor<B, 4> {
    let mut coords = Vec::with_capacity(size * size * 2);
    for y in 0..size {
        for x in 0..size {
            coords.push((2.0 * (x as f32 + 0.5)) / size as f32 - 1.0);
            coords.push((2.0 * (y as f32 + 0.5)) / size as f32 - 1.0);
        }
    }
    let grid = Tensor::<B, 1>::from_floats(coords.as_slice(), device).reshape([1, size, size, 2]);
    grid.repeat_dim(0, n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::{Distribution, TensorData};

    type TestBackend = NdArray<f32>;

    #[test]
    fn sampler_matches_hand_computed_bilinear() {
        let device = Default::default();
        // 2x2 single-channel texture: [[0, 1], [2, 3]].
        let texture = Tensor::<TestBackend, 1>::from_floats([0.0, 1.0, 2.0, 3.0], &device).reshape([1, 1, 2, 2]);
        // The texture center reads the mean of all four texels; (-0.5, -0.5)
        // is the exact center of texel (0, 0).
        let uv = Tensor::<TestBackend, 1>::from_floats([0.0, 0.0, -0.5, -0.5], &device).reshape([1, 1, 2, 2]);
        let out = sample_texture(texture, uv);
        let vals = out.to_data().to_vec::<f32>().unwrap();
        assert!((vals[0] - 1.5).abs() < 1e-5);
        assert!((vals[1] - 0.0).abs() < 1e-5);
    }

    #[test]
    fn out_of_range_and_nan_coordinates_sample_to_zero() {
        let device = Default::default();
        let texture = Tensor::<TestBackend, 4>::ones([1, 1, 4, 4], &device);
        let uv = Tensor::<TestBackend, 1>::from_floats([-3.0, -3.0, f32::NAN, 0.0], &device).reshape([1, 1, 2, 2]);
        let out = sample_texture(texture, uv);
        let vals = out.to_data().to_vec::<f32>().unwrap();
        assert_eq!(vals[0], 0.0);
        assert_eq!(vals[1], 0.0);
    }

    #[test]
    fn frame_passes_through_where_outer_mask_is_zero() {
        let device = Default::default();
        let size = 8;
        let frames = Tensor::<TestBackend, 5>::random([1, 2, 3, size, size], Distribution::Uniform(0.0, 1.0), &device);
        let textures = Tensor::<TestBackend, 4>::random([1, 4, size, size], Distribution::Normal(0.0, 1.0), &device);
        let surfaces = AlignedSurfaces {
            uv: identity_uv_grid(2, size, &device),
            inner: Tensor::zeros([2, 1, size, size], &device),
            outer: Tensor::zeros([2, 1, size, size], &device),
        };
        let input = build(textures, frames.clone(), &surfaces);
        let rgb = input.clone().slice([0..1, 0..2, 0..3, 0..size, 0..size]);
        rgb.to_data().assert_approx_eq(&frames.to_data(), 4);
        // The padding channel stays zero.
        let pad = input.slice([0..1, 0..2, 3..4, 0..size, 0..size]);
        assert!(pad.to_data().to_vec::<f32>().unwrap().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn texture_equal_to_frame_reproduces_it_inside_the_inner_mask() {
        let device = Default::default();
        let size = 8;
        let frames = Tensor::<TestBackend, 5>::random([1, 1, 3, size, size], Distribution::Uniform(0.1, 0.9), &device);
        // Texture RGB channels carry the frame content exactly.
        let pad = Tensor::<TestBackend, 4>::zeros([1, 1, size, size], &device);
        let textures = Tensor::cat(vec![frames.clone().reshape([1, 3, size, size]), pad], 1);
        let surfaces = AlignedSurfaces {
            uv: identity_uv_grid(1, size, &device),
            inner: Tensor::ones([1, 1, size, size], &device),
            outer: Tensor::ones([1, 1, size, size], &device),
        };
        let input = build(textures, frames.clone(), &surfaces);
        let rgb = input.slice([0..1, 0..1, 0..3, 0..size, 0..size]);
        rgb.to_data().assert_approx_eq(&frames.to_data(), 4);
    }

    #[test]
    fn identity_grid_reads_the_texture_back() {
        let device = Default::default();
        let texture = Tensor::<TestBackend, 4>::random([1, 2, 4, 4], Distribution::Normal(0.0, 1.0), &device);
        let out = sample_texture(texture.clone(), identity_uv_grid(1, 4, &device));
        out.to_data().assert_approx_eq(&texture.to_data(), 4);
    }

    #[test]
    fn soft_masks_blend_linearly() {
        let device = Default::default();
        let frames = Tensor::<TestBackend, 5>::ones([1, 1, 3, 2, 2], &device);
        let textures = Tensor::<TestBackend, 4>::zeros([1, 4, 2, 2], &device);
        let half = Tensor::<TestBackend, 4>::from_data(TensorData::new(vec![0.5f32; 4], [1, 1, 2, 2]), &device);
        let surfaces = AlignedSurfaces {
            uv: identity_uv_grid(1, 2, &device),
            inner: half.clone(),
            outer: half,
        };
        let input = build(textures, frames, &surfaces);
        // raster is zero, so the RGB output is frame * (1 - outer) = 0.5.
        let rgb = input.slice([0..1, 0..1, 0..3, 0..2, 0..2]);
        assert!(rgb.to_data().to_vec::<f32>().unwrap().iter().all(|v| (*v - 0.5).abs() < 1e-6));
    }
}
