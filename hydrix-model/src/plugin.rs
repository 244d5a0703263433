use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Broad execution category a plugin belongs to. The orchestrator treats
/// plugins as opaque; the kind exists for catalog filtering only.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PluginKind {
    HttpProbe,
    PortScan,
    Script,
}

impl PluginKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginKind::HttpProbe => "http-probe",
            PluginKind::PortScan => "port-scan",
            PluginKind::Script => "script",
        }
    }
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PluginKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http-probe" => Ok(PluginKind::HttpProbe),
            "port-scan" => Ok(PluginKind::PortScan),
            "script" => Ok(PluginKind::Script),
            other => Err(ModelError::UnknownPluginKind(other.to_string())),
        }
    }
}

/// An atomic unit of "what to run"; immutable once loaded.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub name: String,
    pub kind: PluginKind,
    pub content: String,
}

impl PluginDescriptor {
    pub fn new(
        name: impl Into<String>,
        kind: PluginKind,
        content: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            content: content.into(),
        }
    }
}
