//! Images attached to the reply being composed.

use std::path::Path;

use anyhow::{Context, Result};
use base64::Engine as _;
use base64::engine::general_purpose;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentSource {
    Paste,
    Drop,
    Dialog,
}

/// One attached image, serialized into responses with camelCase keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachedImage {
    pub id: String,
    pub file_name: String,
    pub mime_type: String,
    pub base64_data: String,
    pub data_url: String,
    pub size: u64,
    pub source: AttachmentSource,
}

/// Mime type from the file extension; unknown extensions read as JPEG.
pub fn mime_for(file_name: &str) -> &'static str {
    let ext = Path::new(file_name)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        _ => "image/jpeg",
    }
}

pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .is_some_and(|e| matches!(e.as_str(), "png" | "jpg" | "jpeg" | "gif" | "bmp" | "webp"))
}

impl AttachedImage {
    pub fn from_bytes(file_name: &str, bytes: &[u8], source: AttachmentSource) -> Self {
        let mime_type = mime_for(file_name).to_string();
        let base64_data = general_purpose::STANDARD.encode(bytes);
        Self {
            id: String::new(),
            data_url: format!("data:{mime_type};base64,{base64_data}"),
            file_name: file_name.to_string(),
            mime_type,
            base64_data,
            size: bytes.len() as u64,
            source,
        }
    }

    /// Read an image picked from a file dialog.
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes =
            std::fs::read(path).with_context(|| format!("failed to read image {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "image".to_string());
        Ok(Self::from_bytes(&file_name, &bytes, AttachmentSource::Dialog))
    }

    /// Image the surface already encoded (paste or drop). Accepts either a
    /// bare base64 body or a full data URL.
    pub fn from_encoded(file_name: &str, data: &str, source: AttachmentSource) -> Result<Self> {
        let (mime, encoded) = match data.strip_prefix("data:") {
            Some(rest) => {
                let (mime, body) = rest
                    .split_once(";base64,")
                    .context("invalid data URL image")?;
                (mime.to_string(), body)
            }
            None => (mime_for(file_name).to_string(), data),
        };
        let bytes = general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .context("failed to decode base64 image")?;
        let mut image = Self::from_bytes(file_name, &bytes, source);
        image.mime_type = mime;
        image.data_url = format!("data:{};base64,{}", image.mime_type, image.base64_data);
        Ok(image)
    }
}

/// Ordered set of attachments with ids that stay stable across removals.
#[derive(Debug, Default)]
pub struct AttachmentSet {
    items: Vec<AttachedImage>,
}

impl AttachmentSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an image, assigning it a fresh id. Returns the id.
    pub fn add(&mut self, mut image: AttachedImage) -> String {
        image.id = format!("img_{}", uuid::Uuid::new_v4().simple());
        let id = image.id.clone();
        self.items.push(image);
        id
    }

    pub fn remove(&mut self, id: &str) -> Option<AttachedImage> {
        let pos = self.items.iter().position(|i| i.id == id)?;
        Some(self.items.remove(pos))
    }

    pub fn items(&self) -> &[AttachedImage] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Hand over everything for sending and start empty.
    pub fn take(&mut self) -> Vec<AttachedImage> {
        std::mem::take(&mut self.items)
    }
}
