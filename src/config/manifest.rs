//! Published firmware manifest

use std::path::Path;

use serde::Deserialize;

use crate::core::error::{ServiceError, ServiceResult};

/// Manifest shipped next to the firmware image; only the version is used
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct FirmwareManifest {
    pub version: String,
}

impl FirmwareManifest {
    pub async fn load(path: &Path) -> ServiceResult<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ServiceError::Manifest(format!("{}: {}", path.display(), e)))?;

        serde_json::from_str(&raw)
            .map_err(|e| ServiceError::Manifest(format!("{}: {}", path.display(), e)))
    }
}
