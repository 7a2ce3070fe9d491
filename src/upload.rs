//! Pre-flight checks for proof-of-completion uploads.

use crate::error::UploadError;
use serde::{Deserialize, Serialize};

const MIB: u64 = 1024 * 1024;

/// Accepted extension and the MIME types that may accompany it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AllowedType {
    pub extension: String,
    pub mime_types: Vec<String>,
}

impl AllowedType {
    fn new(extension: &str, mime_types: &[&str]) -> Self {
        Self {
            extension: extension.to_string(),
            mime_types: mime_types.iter().map(|m| m.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadPolicy {
    pub max_files: usize,
    pub max_file_bytes: u64,
    pub max_total_bytes: u64,
    pub allowed: Vec<AllowedType>,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            max_files: 10,
            max_file_bytes: 50 * MIB,
            max_total_bytes: 200 * MIB,
            allowed: vec![
                AllowedType::new("jpg", &["image/jpeg"]),
                AllowedType::new("jpeg", &["image/jpeg"]),
                AllowedType::new("png", &["image/png"]),
                AllowedType::new("gif", &["image/gif"]),
                AllowedType::new("webp", &["image/webp"]),
                AllowedType::new("heic", &["image/heic", "image/heif"]),
                AllowedType::new("mp4", &["video/mp4"]),
                AllowedType::new("mov", &["video/quicktime"]),
                AllowedType::new("webm", &["video/webm"]),
                AllowedType::new("pdf", &["application/pdf"]),
            ],
        }
    }
}

/// A file the user picked, described by what the browser/OS reports.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadCandidate {
    pub name: String,
    pub size: u64,
    #[serde(default)]
    pub mime_type: Option<String>,
}

fn extension_of(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

impl UploadPolicy {
    fn lookup(&self, ext: &str) -> Option<&AllowedType> {
        self.allowed.iter().find(|a| a.extension == ext)
    }

    fn mime_known(&self, mime: &str) -> bool {
        self.allowed
            .iter()
            .any(|a| a.mime_types.iter().any(|m| m == mime))
    }

    /// Validate the whole selection, collecting every violation.
    pub fn validate(&self, files: &[UploadCandidate]) -> Result<(), Vec<UploadError>> {
        let mut errors = Vec::new();
        if files.is_empty() {
            return Err(vec![UploadError::Empty]);
        }
        if files.len() > self.max_files {
            errors.push(UploadError::TooManyFiles {
                count: files.len(),
                max: self.max_files,
            });
        }

        let mut total: u64 = 0;
        for f in files {
            total = total.saturating_add(f.size);
            if let Err(e) = self.validate_file(f) {
                errors.push(e);
            }
        }
        if total > self.max_total_bytes {
            errors.push(UploadError::TotalTooLarge {
                total,
                max: self.max_total_bytes,
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// First problem found with a single file.
    pub fn validate_file(&self, f: &UploadCandidate) -> Result<(), UploadError> {
        if f.size == 0 {
            return Err(UploadError::EmptyFile {
                name: f.name.clone(),
            });
        }
        if f.size > self.max_file_bytes {
            return Err(UploadError::FileTooLarge {
                name: f.name.clone(),
                size: f.size,
                max: self.max_file_bytes,
            });
        }
        let allowed = extension_of(&f.name)
            .and_then(|ext| self.lookup(&ext))
            .ok_or_else(|| UploadError::ExtensionNotAllowed {
                name: f.name.clone(),
            })?;

        // Some platforms report nothing or a generic type; trust the extension then.
        let Some(mime) = f
            .mime_type
            .as_deref()
            .map(|m| m.trim().to_ascii_lowercase())
            .filter(|m| !m.is_empty() && m != "application/octet-stream")
        else {
            return Ok(());
        };
        if !self.mime_known(&mime) {
            return Err(UploadError::MimeNotAllowed {
                name: f.name.clone(),
                mime,
            });
        }
        if !allowed.mime_types.iter().any(|m| *m == mime) {
            return Err(UploadError::MimeMismatch {
                name: f.name.clone(),
                mime,
            });
        }
        Ok(())
    }
}
