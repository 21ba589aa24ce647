//! Subset of the OCI runtime specification consumed by the service.
//!
//! Only the fields the service reads are modeled explicitly; everything
//! else the orchestrator sends is carried through `extra` so the bundle
//! `config.json` is written back without loss.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// OCI container specification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Spec {
    /// Version of the OCI specification.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub oci_version: String,
    /// Init process of the container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<Process>,
    /// Root filesystem of the container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<Root>,
    /// Container hostname.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hostname: String,
    /// Additional mounts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mounts: Vec<Mount>,
    /// Windows-specific section, which carries the network namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub windows: Option<Windows>,
    /// Fields not modeled above.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Spec {
    /// Returns the declared network namespace, if non-empty.
    #[must_use]
    pub fn network_namespace(&self) -> Option<&str> {
        self.windows
            .as_ref()
            .and_then(|w| w.network.as_ref())
            .map(|n| n.network_namespace.as_str())
            .filter(|ns| !ns.is_empty())
    }

    /// Returns `true` if the init process declares a terminal.
    #[must_use]
    pub fn has_terminal(&self) -> bool {
        self.process.as_ref().is_some_and(|p| p.terminal)
    }
}

/// A process to run inside a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Process {
    /// Whether a pseudo-terminal is attached.
    #[serde(default)]
    pub terminal: bool,
    /// Command line.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment in `KEY=value` form.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    /// Working directory.
    #[serde(default)]
    pub cwd: String,
    /// User the process runs as.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

/// Identity of a process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// User id.
    pub uid: u32,
    /// Group id.
    pub gid: u32,
}

/// Root filesystem of a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Root {
    /// Path to the root filesystem.
    pub path: String,
    /// Whether the root is read-only.
    #[serde(default)]
    pub readonly: bool,
}

/// A mount entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mount {
    /// Destination inside the container.
    pub destination: String,
    /// Filesystem type.
    #[serde(default, rename = "type", skip_serializing_if = "String::is_empty")]
    pub kind: String,
    /// Mount source.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
    /// Mount options.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

/// Windows-specific section of the specification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Windows {
    /// Network settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<WindowsNetwork>,
}

/// Network settings of the Windows section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowsNetwork {
    /// Namespace whose adapters belong to this container.
    #[serde(default)]
    pub network_namespace: String,
}
