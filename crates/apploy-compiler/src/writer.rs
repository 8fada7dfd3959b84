//! Filesystem output for compiled manifests
//!
//! Layout under the target directory:
//!
//! ```text
//! <dir>/<app>/<kind>-<name>.<ext>              app-scope resources
//! <dir>/<app>/<component>/<kind>-<name>.<ext>  component resources and workload
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::WriteError;
use crate::manifest::{AppManifests, Manifest};
use crate::registry::{Format, Registry};

/// Writes [`AppManifests`] as one file per manifest
pub struct ManifestWriter<'r> {
    registry: &'r Registry,
    format: Format,
}

impl<'r> ManifestWriter<'r> {
    pub fn new(registry: &'r Registry, format: Format) -> Self {
        Self { registry, format }
    }

    /// Write every manifest below `dir`, which must already exist.
    ///
    /// Returns the app directory and the files written, in write order.
    pub fn write(
        &self,
        manifests: &AppManifests,
        dir: &Path,
    ) -> Result<(PathBuf, Vec<PathBuf>), WriteError> {
        if !dir.is_dir() {
            return Err(WriteError::MissingDir {
                path: dir.to_path_buf(),
            });
        }

        let root = dir.join(&manifests.app);
        create_dir(&root)?;
        let mut written = Vec::with_capacity(manifests.len());

        for manifest in manifests.common.iter() {
            written.push(self.write_one(&root, manifest)?);
        }
        for component in &manifests.components {
            let component_dir = root.join(&component.name);
            create_dir(&component_dir)?;
            for manifest in component.common.iter() {
                written.push(self.write_one(&component_dir, manifest)?);
            }
            written.push(self.write_one(&component_dir, &component.workload)?);
        }

        info!(
            app = %manifests.app,
            dir = %root.display(),
            files = written.len(),
            "wrote manifests"
        );
        Ok((root, written))
    }

    fn write_one(&self, dir: &Path, manifest: &Manifest) -> Result<PathBuf, WriteError> {
        let body = self.registry.encode(manifest, self.format)?;
        let path = dir.join(file_name(manifest, self.format));
        fs::write(&path, body).map_err(|e| WriteError::io(&path, e))?;
        debug!(path = %path.display(), "wrote manifest");
        Ok(path)
    }
}

/// `<kind>-<name>.<ext>`, kind lowercased
pub fn file_name(manifest: &Manifest, format: Format) -> String {
    format!(
        "{}-{}.{}",
        manifest.kind().as_str().to_ascii_lowercase(),
        manifest.name(),
        format.extension()
    )
}

fn create_dir(path: &Path) -> Result<(), WriteError> {
    fs::create_dir_all(path).map_err(|e| WriteError::io(path, e))
}
