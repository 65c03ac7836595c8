use crate::common::config::DEFAULT_TOLERANCE;
use crate::common::{FaceUnlockError, Result};
use crate::core::matcher::{Embedding, GalleryEntry};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

const GALLERY_VERSION: u32 = 1;

/// On-disk layout of the enrolled face model: parallel `names`/`encodings`
/// plus the tolerance the enrollment step recommends.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct GalleryModel {
    #[serde(default = "default_version")]
    pub version: u32,
    pub names: Vec<String>,
    pub encodings: Vec<Embedding>,
    #[serde(default)]
    pub tolerance: Option<f32>,
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub trained_at: Option<String>,
}

fn default_version() -> u32 { GALLERY_VERSION }

/// Enrolled identities, read-only after load.
#[derive(Debug, Clone)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
    tolerance: f32,
    users: Vec<String>,
    trained_at: Option<String>,
}

impl Gallery {
    pub fn new(entries: Vec<GalleryEntry>, tolerance: f32) -> Self {
        Self {
            entries,
            tolerance,
            users: Vec::new(),
            trained_at: None,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(FaceUnlockError::Gallery(format!(
                "Face model not found at {}. Enroll users and build the model first.",
                path.display()
            )));
        }

        let data = fs::read(path)?;
        let mut model: GalleryModel = if is_json(path) {
            serde_json::from_slice(&data)
                .map_err(|e| FaceUnlockError::Gallery(format!("Failed to parse {}: {}", path.display(), e)))?
        } else {
            bincode::deserialize(&data)
                .map_err(|e| FaceUnlockError::Gallery(format!("Failed to deserialize {}: {}", path.display(), e)))?
        };

        if model.version < GALLERY_VERSION {
            model.version = GALLERY_VERSION;
        }

        let gallery = Self::from_model(model)?;
        tracing::info!(
            "Loaded face model: {} entries, identities: {}",
            gallery.len(),
            gallery.identities().join(", ")
        );
        Ok(gallery)
    }

    pub fn from_model(model: GalleryModel) -> Result<Self> {
        if model.names.len() != model.encodings.len() {
            return Err(FaceUnlockError::Gallery(format!(
                "Face model has {} names but {} encodings",
                model.names.len(),
                model.encodings.len()
            )));
        }
        if model.encodings.is_empty() {
            return Err(FaceUnlockError::Gallery("Face model contains no encodings".into()));
        }

        let dimension = model.encodings[0].len();
        if dimension == 0 {
            return Err(FaceUnlockError::Gallery("Face model encodings are empty vectors".into()));
        }

        let mut entries = Vec::with_capacity(model.names.len());
        for (index, (name, encoding)) in model.names.into_iter().zip(model.encodings).enumerate() {
            if name.trim().is_empty() {
                return Err(FaceUnlockError::Gallery(format!("Entry {} has an empty identity name", index)));
            }
            if encoding.len() != dimension {
                return Err(FaceUnlockError::Gallery(format!(
                    "Entry {} ({}) has dimension {}, expected {}",
                    index, name, encoding.len(), dimension
                )));
            }
            if encoding.iter().any(|v| !v.is_finite()) {
                return Err(FaceUnlockError::Gallery(format!("Entry {} ({}) contains non-finite values", index, name)));
            }
            entries.push(GalleryEntry::new(name, encoding));
        }

        let tolerance = match model.tolerance {
            Some(t) if t.is_finite() && t > 0.0 => t,
            _ => DEFAULT_TOLERANCE,
        };

        Ok(Self {
            entries,
            tolerance,
            users: model.users,
            trained_at: model.trained_at,
        })
    }

    /// Applies the authorized-user list: `configured` when it is non-empty,
    /// else the users recorded in the model at enrollment.
    pub fn authorize(self, configured: &[String]) -> Result<Self> {
        if !configured.is_empty() {
            return self.restrict_to(configured);
        }
        let users = self.users.clone();
        if !users.is_empty() {
            tracing::debug!("Authorizing users recorded in the face model: {}", users.join(", "));
        }
        self.restrict_to(&users)
    }

    /// Keeps only entries of the given identities. An empty list keeps all.
    pub fn restrict_to(self, authorized: &[String]) -> Result<Self> {
        if authorized.is_empty() {
            return Ok(self);
        }

        let before = self.entries.len();
        let entries: Vec<_> = self
            .entries
            .into_iter()
            .filter(|e| authorized.iter().any(|user| user == &e.identity))
            .collect();

        if entries.is_empty() {
            return Err(FaceUnlockError::Gallery(format!(
                "None of the authorized users ({}) are enrolled in the face model",
                authorized.join(", ")
            )));
        }
        if entries.len() < before {
            tracing::warn!(
                "Ignoring {} face model entries of unauthorized identities",
                before - entries.len()
            );
        }

        Ok(Self { entries, ..self })
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Recommended tolerance stored with the model.
    pub fn tolerance(&self) -> f32 {
        self.tolerance
    }

    /// Users the model was trained for, possibly empty.
    pub fn users(&self) -> &[String] {
        &self.users
    }

    pub fn trained_at(&self) -> Option<&str> {
        self.trained_at.as_deref()
    }

    /// Distinct identities in gallery order.
    pub fn identities(&self) -> Vec<String> {
        let mut seen: Vec<String> = Vec::new();
        for entry in &self.entries {
            if !seen.contains(&entry.identity) {
                seen.push(entry.identity.clone());
            }
        }
        seen
    }
}

fn is_json(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("json")
}
