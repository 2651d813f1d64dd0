use std::fmt;

use serde::{Deserialize, Serialize};

/// Name of the virtual audio sink a plugin should write to
///
/// Bindings are always derived from the current source and routing settings,
/// never stored on their own.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceBinding(String);

impl DeviceBinding {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
