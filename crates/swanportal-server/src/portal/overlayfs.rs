//! Read-only overlay filesystem.
//!
//! Layers an ordered list of directory trees; the first layer that
//! resolves a name wins. The portal uses one overlay per asset kind
//! (webroot, templates, email attachments), each layering the site
//! directory over the installed data directory.

use std::path::{Path, PathBuf};

/// Ordered stack of directory layers.
#[derive(Debug, Clone)]
pub struct OverlayFs {
    layers: Vec<PathBuf>,
}

impl OverlayFs {
    /// Build an overlay; earlier layers shadow later ones.
    pub fn new(layers: Vec<PathBuf>) -> Self {
        Self { layers }
    }

    /// Overlay of `subdir` under a site directory and a data directory.
    ///
    /// An empty site directory contributes no layer.
    pub fn for_subdir(site_dir: &str, data_dir: &str, subdir: &str) -> Self {
        let mut layers = Vec::with_capacity(2);
        if !site_dir.is_empty() {
            layers.push(Path::new(site_dir).join(subdir));
        }
        layers.push(Path::new(data_dir).join(subdir));
        Self::new(layers)
    }

    /// Read a file, first resolving layer wins. `None` when no layer has
    /// it or the name tries to escape the tree.
    pub fn read(&self, name: &str) -> Option<Vec<u8>> {
        if name.is_empty()
            || name.starts_with('/')
            || name.split('/').any(|part| part == ".." || part.is_empty())
        {
            return None;
        }

        for layer in &self.layers {
            if let Ok(data) = std::fs::read(layer.join(name)) {
                return Some(data);
            }
        }
        None
    }

    /// Read a file as UTF-8 text.
    pub fn read_string(&self, name: &str) -> Option<String> {
        String::from_utf8(self.read(name)?).ok()
    }
}
