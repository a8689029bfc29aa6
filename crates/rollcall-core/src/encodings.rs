//! Known-face encodings file.
//!
//! Produced offline from a directory holding one photo per person (the file
//! stem is the person's label) and read by the attendance console at startup.
//! The file is rewritten whole each time photos change.

use crate::recognizer::{ARCFACE_EMBEDDING_DIM, ARCFACE_MODEL_VERSION};
use crate::types::KnownFace;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const ENCODING_FILE_VERSION: u32 = 1;

const PHOTO_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

#[derive(Error, Debug)]
pub enum EncodingError {
    #[error("encodings file {0} does not exist; run `rollcall encode` first")]
    NotFound(PathBuf),
    #[error("no face encodings found in {0}")]
    Empty(PathBuf),
    #[error("malformed encodings file {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unsupported encodings file version {0}")]
    UnsupportedVersion(u32),
    #[error("encodings were made with model {found}, expected {expected}; run `rollcall encode` again")]
    ModelMismatch { expected: String, found: String },
    #[error("encoding for {label} has {found} dimensions, expected {expected}; run `rollcall encode` again")]
    DimensionMismatch {
        label: String,
        expected: usize,
        found: usize,
    },
    #[error("photo directory {0} does not exist")]
    PhotoDirMissing(PathBuf),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serialize encodings: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// On-disk encodings document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodingFile {
    pub version: u32,
    pub model_version: String,
    pub generated_at: String,
    pub faces: Vec<KnownFace>,
}

impl EncodingFile {
    pub fn new(model_version: impl Into<String>, faces: Vec<KnownFace>) -> Self {
        Self {
            version: ENCODING_FILE_VERSION,
            model_version: model_version.into(),
            generated_at: chrono::Utc::now().to_rfc3339(),
            faces,
        }
    }

    /// Load and validate an encodings file. An empty gallery is an error, as
    /// is any encoding not produced by the current recognizer model.
    pub fn load(path: &Path) -> Result<Self, EncodingError> {
        if !path.exists() {
            return Err(EncodingError::NotFound(path.to_path_buf()));
        }
        let raw = std::fs::read_to_string(path).map_err(|source| EncodingError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: EncodingFile = serde_json::from_str(&raw).map_err(|source| EncodingError::Malformed {
            path: path.to_path_buf(),
            source,
        })?;

        if file.version != ENCODING_FILE_VERSION {
            return Err(EncodingError::UnsupportedVersion(file.version));
        }
        if file.faces.is_empty() {
            return Err(EncodingError::Empty(path.to_path_buf()));
        }
        file.check_model(ARCFACE_MODEL_VERSION, ARCFACE_EMBEDDING_DIM)?;

        tracing::info!(
            path = %path.display(),
            faces = file.faces.len(),
            model = %file.model_version,
            "loaded face encodings"
        );
        Ok(file)
    }

    fn check_model(&self, model_version: &str, dim: usize) -> Result<(), EncodingError> {
        if self.model_version != model_version {
            return Err(EncodingError::ModelMismatch {
                expected: model_version.to_string(),
                found: self.model_version.clone(),
            });
        }
        for face in &self.faces {
            let stale = face.embedding.model_version.as_deref().is_some_and(|v| v != model_version);
            if stale {
                return Err(EncodingError::ModelMismatch {
                    expected: model_version.to_string(),
                    found: face.embedding.model_version.clone().unwrap_or_default(),
                });
            }
            if face.embedding.values.len() != dim {
                return Err(EncodingError::DimensionMismatch {
                    label: face.label.clone(),
                    expected: dim,
                    found: face.embedding.values.len(),
                });
            }
        }
        Ok(())
    }

    /// Write the file via a sibling temp file and rename.
    pub fn save(&self, path: &Path) -> Result<(), EncodingError> {
        let io_err = |source| EncodingError::Io { path: path.to_path_buf(), source };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let json = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(io_err)?;
        std::fs::rename(&tmp, path).map_err(io_err)?;

        tracing::info!(path = %path.display(), faces = self.faces.len(), "wrote face encodings");
        Ok(())
    }

    /// Labels in gallery order.
    pub fn labels(&self) -> Vec<&str> {
        self.faces.iter().map(|f| f.label.as_str()).collect()
    }
}

/// Person label for a reference photo: its file stem.
pub fn photo_label(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Reference photos in `dir`, sorted by path.
pub fn list_photos(dir: &Path) -> Result<Vec<PathBuf>, EncodingError> {
    if !dir.is_dir() {
        return Err(EncodingError::PhotoDirMissing(dir.to_path_buf()));
    }

    let entries = std::fs::read_dir(dir).map_err(|source| EncodingError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut photos: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && is_photo(p))
        .collect();
    photos.sort();
    Ok(photos)
}

fn is_photo(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| PHOTO_EXTENSIONS.iter().any(|ok| e.eq_ignore_ascii_case(ok)))
        .unwrap_or(false)
}
