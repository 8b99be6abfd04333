//! Independent persistence for the three parameter groups. Renderer,
//! discriminator and texture store save and load separately, so identity
//! fine-tuning can restore a pretrained renderer and persist only the
//! textures. Tensor state goes through burn's `CompactRecorder`; the texture
//! store's identity index travels as a JSON sidecar next to the record.

use crate::config::ModelConfig;
use crate::renderer::{Discriminator, Renderer};
use crate::texture::TextureStore;
use burn::module::Module;
use burn::record::{CompactRecorder, RecorderError};
use burn::tensor::backend::Backend;
use log::info;
use std::fmt;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum CheckpointError {
    Recorder(RecorderError),
    Io(io::Error),
    Json(serde_json::Error),
}

impl fmt::Display for CheckpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Recorder(err) => write!(f, "record error: {err}"),
            Self::Io(err) => write!(f, "io error: {err}"),
            Self::Json(err) => write!(f, "identity index error: {err}"),
        }
    }
}

impl std::error::Error for CheckpointError {}

impl From<RecorderError> for CheckpointError {
    fn from(err: RecorderError) -> Self {
        Self::Recorder(err)
    }
}

impl From<io::Error> for CheckpointError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for CheckpointError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}

fn sidecar_path(stem: &Path) -> PathBuf {
    stem.with_extension("ids.json")
}

pub fn save_renderer<B: Backend>(renderer: &Renderer<B>, path: &Path) -> Result<(), CheckpointError> {
    renderer.clone().save_file(path.to_path_buf(), &CompactRecorder::new())?;
    info!("Saved renderer to {}", path.display());
    Ok(())
}

pub fn load_renderer<B: Backend>(
    model: &ModelConfig,
    path: &Path,
    device: &B::Device,
) -> Result<Renderer<B>, CheckpointError> {
    let renderer = Renderer::init(model, device).load_file(path.to_path_buf(), &CompactRecorder::new(), device)?;
    info!("Loaded renderer from {}", path.display());
    Ok(renderer)
}

pub fn save_discriminator<B: Backend>(discriminator: &Discriminator<B>, path: &Path) -> Result<(), CheckpointError> {
    discriminator.clone().save_file(path.to_path_buf(), &CompactRecorder::new())?;
    info!("Saved discriminator to {}", path.display());
    Ok(())
}

pub fn load_discriminator<B: Backend>(
    model: &ModelConfig,
    path: &Path,
    device: &B::Device,
) -> Result<Discriminator<B>, CheckpointError> {
    let discriminator =
        Discriminator::init(model, device).load_file(path.to_path_buf(), &CompactRecorder::new(), device)?;
    info!("Loaded discriminator from {}", path.display());
    Ok(discriminator)
}

/// Saves the texture record at `stem` (the recorder appends its own
/// extension) and the identity index at `stem.ids.json`.
pub fn save_textures<B: Backend>(store: &TextureStore<B>, stem: &Path) -> Result<(), CheckpointError> {
    let sidecar = sidecar_path(stem);
    serde_json::to_writer_pretty(File::create(&sidecar)?, store.identities())?;
    store.clone().save_file(stem.to_path_buf(), &CompactRecorder::new())?;
    info!(
        "Saved texture store ({} identities) to {}",
        store.identities().len(),
        stem.display()
    );
    Ok(())
}

/// Rebuilds a texture store from the identity sidecar, then restores the
/// recorded tensors over it. The sidecar fixes both the identity keys and
/// their order, which must match the record.
pub fn load_textures<B: Backend>(
    model: &ModelConfig,
    stem: &Path,
    device: &B::Device,
) -> Result<TextureStore<B>, CheckpointError> {
    let ids: Vec<String> = serde_json::from_reader(File::open(sidecar_path(stem))?)?;
    let store = TextureStore::with_noise(model, &ids, device).load_file(
        stem.to_path_buf(),
        &CompactRecorder::new(),
        device,
    )?;
    info!("Loaded texture store ({} identities) from {}", ids.len(), stem.display());
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use std::fs;

    type TestBackend = NdArray<f32>;

    fn small_config() -> ModelConfig {
        ModelConfig::new()
            .with_image_size(32)
            .with_texture_size(8)
            .with_texture_channels(4)
            .with_cond_dim(8)
            .with_renderer_features(4)
            .with_disc_features(4)
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("facedub-checkpoint-{name}-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn texture_store_round_trip() {
        let device = Default::default();
        let config = small_config();
        let ids = vec!["anna".to_string(), "ben".to_string()];
        let store = TextureStore::<TestBackend>::with_noise(&config, &ids, &device);

        let dir = scratch_dir("textures");
        let stem = dir.join("textures");
        save_textures(&store, &stem).unwrap();
        let restored = load_textures::<TestBackend>(&config, &stem, &device).unwrap();

        assert_eq!(restored.identities(), store.identities());
        for (id, texture) in store.iter() {
            let original = texture.to_data().to_vec::<f32>().unwrap();
            let loaded = restored.get(id).to_data().to_vec::<f32>().unwrap();
            assert_eq!(original, loaded);
        }
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn renderer_round_trip_restores_weights() {
        let device = Default::default();
        let config = small_config();
        let renderer = Renderer::<TestBackend>::init(&config, &device);

        let dir = scratch_dir("renderer");
        let stem = dir.join("renderer");
        save_renderer(&renderer, &stem).unwrap();
        let restored = load_renderer::<TestBackend>(&config, &stem, &device).unwrap();

        let input = burn::tensor::Tensor::<TestBackend, 4>::ones([1, config.texture_channels, 32, 32], &device);
        let cond = burn::tensor::Tensor::<TestBackend, 2>::ones([1, config.cond_dim], &device);
        let a = renderer.forward(input.clone(), cond.clone()).to_data().to_vec::<f32>().unwrap();
        let b = restored.forward(input, cond).to_data().to_vec::<f32>().unwrap();
        assert_eq!(a, b);
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn missing_record_is_an_error() {
        let device = Default::default();
        let config = small_config();
        let missing = std::env::temp_dir().join("facedub-checkpoint-missing/nothing");
        assert!(load_textures::<TestBackend>(&config, &missing, &device).is_err());
    }
}
