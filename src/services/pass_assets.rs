use std::path::PathBuf;

use crate::error::PassError;
use crate::models::platform::Platform;

pub const REQUIRED_ASSETS: &[&str] = &["icon.png"];
pub const OPTIONAL_ASSETS: &[&str] = &["icon@2x.png", "logo.png", "logo@2x.png", "strip.png"];

/// Image bundled into a pass archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassAsset {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Reads pass images from an asset directory
#[derive(Debug, Clone)]
pub struct PassAssets {
    dir: PathBuf,
}

impl PassAssets {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Loads the bundle, sorted by filename. Missing required images fail the
    /// load; missing optional ones are skipped.
    pub fn load(&self) -> Result<Vec<PassAsset>, PassError> {
        let mut assets = Vec::new();

        for name in REQUIRED_ASSETS {
            let path = self.dir.join(name);
            let bytes = std::fs::read(&path).map_err(|e| {
                tracing::warn!(path = %path.display(), error = %e, "Required pass asset missing");
                PassError::AssetMissing {
                    platform: Platform::Apple,
                    asset: (*name).to_string(),
                }
            })?;
            assets.push(PassAsset {
                filename: (*name).to_string(),
                bytes,
            });
        }

        for name in OPTIONAL_ASSETS {
            match std::fs::read(self.dir.join(name)) {
                Ok(bytes) => assets.push(PassAsset {
                    filename: (*name).to_string(),
                    bytes,
                }),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(PassError::AssetMissing {
                        platform: Platform::Apple,
                        asset: format!("{} ({})", name, e),
                    })
                }
            }
        }

        assets.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(assets)
    }
}
