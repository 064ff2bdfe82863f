//! Directory of images offered for classification on click.
//!
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "gif", "bmp", "webp"];

#[derive(Clone, Debug)]
pub struct Gallery {
    dir: PathBuf,
}

impl Gallery {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Names of all images in the gallery, sorted.
    ///
    /// A missing directory is an empty gallery.
    pub fn list(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(vec![]);
        }

        let mut names = vec![];
        for entry in std::fs::read_dir(&self.dir)
            .with_context(|| format!("failed to read gallery {}", self.dir.display()))?
        {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if is_image_name(name) {
                    names.push(name.to_owned());
                }
            }
        }
        names.sort();

        Ok(names)
    }

    /// Read an image by name. Only names returned by `list` are served, `None` for any other.
    pub fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        if !self.list()?.iter().any(|known| known == name) {
            return Ok(None);
        }
        let path = self.dir.join(name);
        let data =
            std::fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
        Ok(Some(data))
    }
}

fn extension(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

fn is_image_name(name: &str) -> bool {
    extension(name).map_or(false, |ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// MIME type for an image file name.
pub fn content_type(name: &str) -> &'static str {
    match extension(name).as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}
