//! Narrow experiment-tracking interface: scalar metrics per step and preview
//! videos per epoch. The default sink logs through `log`; richer trackers
//! implement [`MetricSink`] outside this crate.

use image::RgbImage;
use log::info;
use std::path::Path;

/// A preview sequence of side-by-side real|rendered frames, 8-bit RGB.
#[derive(Clone, Debug)]
pub struct PreviewVideo {
    pub width: usize,
    pub height: usize,
    /// One `width * height * 3` RGB buffer per frame.
    pub frames: Vec<Vec<u8>>,
}

pub trait MetricSink {
    fn scalar(&mut self, name: &str, value: f32, step: u64);

    fn video(&mut self, _name: &str, _video: &PreviewVideo, _step: u64) {}
}

/// Default sink: everything goes to the log.
#[derive(Default)]
pub struct LogSink;

impl MetricSink for LogSink {
    fn scalar(&mut self, name: &str, value: f32, step: u64) {
        info!(target: "facedub::metrics", "step {step}: {name} = {value:.5}");
    }

    fn video(&mut self, name: &str, video: &PreviewVideo, step: u64) {
        info!(
            target: "facedub::metrics",
            "step {step}: {name} = {} preview frames ({}x{})",
            video.frames.len(),
            video.width,
            video.height
        );
    }
}

/// Writes every preview frame as `<prefix>_NNNN.png` under `dir`.
///
/// # Panics
/// Will panic if a frame buffer does not match the video dimensions
pub fn write_preview_frames(video: &PreviewVideo, dir: &Path, prefix: &str) -> Result<(), image::ImageError> {
    for (i, frame) in video.frames.iter().enumerate() {
        let img = RgbImage::from_raw(video.width as u32, video.height as u32, frame.clone())
            .expect("Preview frame buffer matches its dimensions");
        img.save(dir.join(format!("{prefix}_{i:04}.png")))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_sink_accepts_scalars_and_videos() {
        let mut sink = LogSink;
        sink.scalar("loss", 0.5, 1);
        let video = PreviewVideo {
            width: 2,
            height: 1,
            frames: vec![vec![0u8; 6]],
        };
        sink.video("video_0", &video, 1);
    }
}
