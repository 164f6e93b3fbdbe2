//! Reference person description

use serde::{Deserialize, Serialize};

use crate::error::{ScanError, ScanResult};

/// Face and/or gait embedding of the person being searched for
///
/// At least one embedding is present. Fields are private so a profile cannot
/// change once a task holds it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetProfile {
    name: String,
    face: Option<Vec<f32>>,
    gait: Option<Vec<f32>>,
}

impl TargetProfile {
    /// Build a profile, rejecting one with no usable embedding
    pub fn new(
        name: impl Into<String>,
        face: Option<Vec<f32>>,
        gait: Option<Vec<f32>>,
    ) -> ScanResult<Self> {
        let name = name.into();
        let face = face.filter(|v| !v.is_empty());
        let gait = gait.filter(|v| !v.is_empty());
        if face.is_none() && gait.is_none() {
            return Err(ScanError::TargetProfileMissing(format!(
                "profile '{}' has neither a face nor a gait embedding",
                name
            )));
        }
        Ok(Self { name, face, gait })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn face(&self) -> Option<&[f32]> {
        self.face.as_deref()
    }

    pub fn gait(&self) -> Option<&[f32]> {
        self.gait.as_deref()
    }
}
