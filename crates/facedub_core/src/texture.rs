//! Per-identity neural textures: an explicit registry mapping identity keys
//! to owned, optimizable texture tensors. Being a burn `Module`, the store is
//! exactly one optimizer parameter group and records/restores as one unit
//! (the identity index travels as a JSON sidecar, see `training::checkpoint`).

use crate::config::ModelConfig;
use burn::module::{Ignored, Module, Param};
use burn::tensor::backend::Backend;
use burn::tensor::{Distribution, Tensor};
use log::info;

#[derive(Module, Debug)]
pub struct TextureStore<B: Backend> {
    textures: Vec<Param<Tensor<B, 4>>>,
    ids: Ignored<Vec<String>>,
}

impl<B: Backend> TextureStore<B> {
    /// Creates one independent standard-normal noise texture
    /// `[1, C, S_tex, S_tex]` per known identity.
    ///
    /// # Panics
    /// Will panic if the same identity appears twice
    pub fn with_noise(config: &ModelConfig, ids: &[String], device: &B::Device) -> Self {
        let mut store = Self {
            textures: Vec::with_capacity(ids.len()),
            ids: Ignored(Vec::with_capacity(ids.len())),
        };
        for id in ids {
            let texture = Self::noise_texture(config, device);
            store.insert(id, texture);
        }
        info!("Initialised texture store with {} identities", store.len());
        store
    }

    /// A fresh standard-normal texture with the store's shape, used by the
    /// identity fine-tuning path before the fitted result is inserted.
    pub fn noise_texture(config: &ModelConfig, device: &B::Device) -> Tensor<B, 4> {
        Tensor::random(
            [1, config.texture_channels, config.texture_size, config.texture_size],
            Distribution::Normal(0.0, 1.0),
            device,
        )
    }

    /// Looks up the texture for `id`.
    pub fn lookup(&self, id: &str) -> Option<Tensor<B, 4>> {
        self.ids.iter().position(|known| known == id).map(|idx| self.textures[idx].val())
    }

    /// Returns the texture for `id`. An unknown identity during joint
    /// training is a programmer error and fails immediately.
    ///
    /// # Panics
    /// Will panic if the identity is not in the store
    pub fn get(&self, id: &str) -> Tensor<B, 4> {
        self.lookup(id).unwrap_or_else(|| panic!("Unknown identity in texture store: {id}"))
    }

    /// Inserts a texture under a new identity key.
    ///
    /// # Panics
    /// Will panic if the identity already exists or the shape differs from
    /// the stored textures
    pub fn insert(&mut self, id: &str, texture: Tensor<B, 4>) {
        assert!(!self.contains(id), "Identity already in texture store: {id}");
        if let Some(existing) = self.textures.first() {
            assert!(
                existing.dims() == texture.dims(),
                "Texture shape mismatch for {id}: {:?} != {:?}",
                texture.dims(),
                existing.dims()
            );
        }
        self.ids.0.push(id.to_string());
        self.textures.push(Param::from_tensor(texture));
    }

    /// Iterates `(identity, texture)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Tensor<B, 4>)> {
        self.ids.iter().map(String::as_str).zip(self.textures.iter().map(Param::val))
    }

    pub fn identities(&self) -> &[String] {
        &self.ids
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.iter().any(|known| known == id)
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }
}
