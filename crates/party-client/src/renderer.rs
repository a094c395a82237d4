//! Rendering seam
//!
//! The session never draws anything itself. It tells a [`Renderer`] which
//! avatars exist, which model each one uses, and what motion to apply.

use bytes::Bytes;
use serde_json::Value;

/// Model an avatar is spawned with
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AvatarAsset {
    /// No model cached yet; use the renderer's default
    Placeholder,
    /// Raw model bytes
    Model(Bytes),
}

impl AvatarAsset {
    pub fn is_placeholder(&self) -> bool {
        matches!(self, AvatarAsset::Placeholder)
    }
}

impl From<Option<Bytes>> for AvatarAsset {
    fn from(model: Option<Bytes>) -> Self {
        model.map_or(AvatarAsset::Placeholder, AvatarAsset::Model)
    }
}

/// Consumer of decoded session data. Calls must not block.
pub trait Renderer: Send + Sync {
    /// A participant became visible
    fn spawn_avatar(&self, id: &str, asset: AvatarAsset);

    /// A participant left
    fn remove_avatar(&self, id: &str);

    /// Apply one motion sample
    fn apply_motion(&self, id: &str, data: &Value);

    /// Swap in a newly received model
    fn replace_asset(&self, id: &str, model: Bytes);
}

/// Renderer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRenderer;

impl Renderer for NullRenderer {
    fn spawn_avatar(&self, _id: &str, _asset: AvatarAsset) {}
    fn remove_avatar(&self, _id: &str) {}
    fn apply_motion(&self, _id: &str, _data: &Value) {}
    fn replace_asset(&self, _id: &str, _model: Bytes) {}
}
