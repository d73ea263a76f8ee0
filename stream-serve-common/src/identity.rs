//! Model identity types.

use serde::{Deserialize, Serialize};

/// Identity of a served model.
///
/// Fixed when the predictor is loaded; topic names are derived from it, so
/// two identities that differ in any field never share a topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelIdentity {
    /// Model name (e.g., "fashion-image-classifier")
    pub name: String,
    pub major_version: u32,
    pub minor_version: u32,
}

impl ModelIdentity {
    pub fn new(name: impl Into<String>, major_version: u32, minor_version: u32) -> Self {
        Self {
            name: name.into(),
            major_version,
            minor_version,
        }
    }

    /// Version in `major.minor` form.
    pub fn version(&self) -> String {
        format!("{}.{}", self.major_version, self.minor_version)
    }
}

impl std::fmt::Display for ModelIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} v{}", self.name, self.version())
    }
}
