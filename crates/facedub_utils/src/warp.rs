use nalgebra as na;
use ndarray as nd;

/// Bilinearly reads `src[ch]` at continuous coordinates (`sx`, `sy`), returning
/// zero outside the source extent. Non-finite coordinates also read as zero,
/// which doubles as the finiteness guard for degenerate transforms.
fn sample_bilinear(src: &nd::ArrayView3<f32>, ch: usize, sx: f32, sy: f32) -> f32 {
    if !sx.is_finite() || !sy.is_finite() {
        return 0.0;
    }
    let (_, h, w) = src.dim();
    let x0f = sx.floor();
    let y0f = sy.floor();
    let wx = sx - x0f;
    let wy = sy - y0f;
    let x0 = x0f as i64;
    let y0 = y0f as i64;

    let mut acc = 0.0;
    for (dy, dx, weight) in [
        (0i64, 0i64, (1.0 - wx) * (1.0 - wy)),
        (0, 1, wx * (1.0 - wy)),
        (1, 0, (1.0 - wx) * wy),
        (1, 1, wx * wy),
    ] {
        let y = y0 + dy;
        let x = x0 + dx;
        if y >= 0 && x >= 0 && (y as usize) < h && (x as usize) < w {
            acc += weight * src[[ch, y as usize, x as usize]];
        }
    }
    acc
}

/// Resamples a `[c, h, w]` crop-space map into a `[c, out_size, out_size]`
/// frame-space map using inverse mapping: `tform` takes frame-space pixel
/// coordinates `(x, y, 1)` to crop-space coordinates, the same convention
/// used to place the reconstruction crop back into the frame.
///
/// Pixels that map outside the crop (or through a singular transform, which
/// produces non-finite coordinates) come out as zero rather than failing.
pub fn warp_into_frame(src: &nd::ArrayView3<f32>, tform: &na::Matrix3<f32>, out_size: usize) -> nd::Array3<f32> {
    let (c, _, _) = src.dim();
    let mut out = nd::Array3::<f32>::zeros((c, out_size, out_size));
    for row in 0..out_size {
        for col in 0..out_size {
            let p = tform * na::Vector3::new(col as f32, row as f32, 1.0);
            let (sx, sy) = if p.z.abs() > f32::EPSILON {
                (p.x / p.z, p.y / p.z)
            } else {
                (f32::NAN, f32::NAN)
            };
            for ch in 0..c {
                out[[ch, row, col]] = sample_bilinear(src, ch, sx, sy);
            }
        }
    }
    out
}

/// Warps a batch `[n, c, h, w]` with one transform per sample. Runs per
/// sample since every sample carries its own transform.
///
/// # Panics
/// Will panic if the number of transforms does not match the batch size
pub fn warp_batch_into_frame(src: &nd::Array4<f32>, tforms: &[na::Matrix3<f32>], out_size: usize) -> nd::Array4<f32> {
    let (n, c, _, _) = src.dim();
    assert!(
        tforms.len() == n,
        "One transform per sample is required: got {} transforms for {} samples",
        tforms.len(),
        n
    );
    let mut out = nd::Array4::<f32>::zeros((n, c, out_size, out_size));
    for i in 0..n {
        let warped = warp_into_frame(&src.index_axis(nd::Axis(0), i), &tforms[i], out_size);
        out.index_axis_mut(nd::Axis(0), i).assign(&warped);
    }
    out
}
