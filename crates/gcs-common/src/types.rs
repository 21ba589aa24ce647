//! Domain primitive types and the hot-plug request shapes.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{GcsError, Result};

/// Unique identifier for a container instance.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a new container ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The reserved id addressing the utility VM itself.
    #[must_use]
    pub fn uvm() -> Self {
        Self(crate::constants::UVM_CONTAINER_ID.to_string())
    }

    /// Returns `true` if this id addresses the utility VM.
    #[must_use]
    pub fn is_uvm(&self) -> bool {
        crate::constants::is_uvm_container_id(&self.0)
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ContainerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// A POSIX signal number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signal(pub i32);

impl Signal {
    /// Hangup.
    pub const SIGHUP: Self = Self(1);
    /// Interrupt.
    pub const SIGINT: Self = Self(2);
    /// Kill, cannot be caught.
    pub const SIGKILL: Self = Self(9);
    /// Polite termination request.
    pub const SIGTERM: Self = Self(15);
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Settings sent with a create-container request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerSettings {
    /// Directory that receives the bundle's `config.json`.
    #[serde(rename = "OCIBundlePath")]
    pub bundle_path: PathBuf,
    /// Specification of the container.
    #[serde(rename = "OCISpecification")]
    pub spec: crate::oci::Spec,
}

/// Kind of resource a modify request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    /// SCSI-attached virtual disk.
    MappedVirtualDisk,
    /// Plan-9 directory share.
    MappedDirectory,
    /// Virtual persistent-memory device.
    VPMemDevice,
    /// Overlay of read-only layers and an optional scratch.
    CombinedLayers,
    /// Network adapter.
    Network,
}

impl ResourceKind {
    /// Wire name of the resource kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MappedVirtualDisk => "MappedVirtualDisk",
            Self::MappedDirectory => "MappedDirectory",
            Self::VPMemDevice => "VPMemDevice",
            Self::CombinedLayers => "CombinedLayers",
            Self::Network => "Network",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = GcsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "MappedVirtualDisk" => Ok(Self::MappedVirtualDisk),
            "MappedDirectory" => Ok(Self::MappedDirectory),
            "VPMemDevice" => Ok(Self::VPMemDevice),
            "CombinedLayers" => Ok(Self::CombinedLayers),
            "Network" => Ok(Self::Network),
            other => Err(GcsError::Unsupported {
                message: format!("the resource type \"{other}\" is not supported"),
            }),
        }
    }
}

/// Operation a modify request applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestType {
    /// Attach the resource.
    Add,
    /// Detach the resource.
    Remove,
    /// Change an attached resource in place.
    Update,
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add => f.write_str("Add"),
            Self::Remove => f.write_str("Remove"),
            Self::Update => f.write_str("Update"),
        }
    }
}

impl FromStr for RequestType {
    type Err = GcsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Add" => Ok(Self::Add),
            "Remove" => Ok(Self::Remove),
            "Update" => Ok(Self::Update),
            other => Err(GcsError::Unsupported {
                message: format!("the request type \"{other}\" is not supported"),
            }),
        }
    }
}

/// Decodes an optional path, treating `""` the same as a missing field.
fn non_empty_path<'de, D>(deserializer: D) -> std::result::Result<Option<PathBuf>, D::Error>
where
    D: Deserializer<'de>,
{
    let path = Option::<PathBuf>::deserialize(deserializer)?;
    Ok(path.filter(|p| !p.as_os_str().is_empty()))
}

/// A SCSI disk addressed by controller and LUN.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MappedVirtualDisk {
    /// Where to mount the disk; no mount happens when absent or empty.
    #[serde(default, deserialize_with = "non_empty_path")]
    pub mount_path: Option<PathBuf>,
    /// SCSI controller number.
    pub controller: u8,
    /// Logical unit number.
    pub lun: u8,
    /// Mount read-only.
    #[serde(default)]
    pub read_only: bool,
}

impl MappedVirtualDisk {
    /// SCSI address used to release the disk, `0:0:<controller>:<lun>`.
    #[must_use]
    pub fn scsi_address(&self) -> String {
        format!("0:0:{}:{}", self.controller, self.lun)
    }
}

/// A directory shared from the host over Plan-9.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MappedDirectory {
    /// Where to mount the share.
    pub mount_path: PathBuf,
    /// Name of the share on the host.
    #[serde(default)]
    pub share_name: String,
    /// Transport port serving the share.
    pub port: u32,
    /// Mount read-only.
    #[serde(default)]
    pub read_only: bool,
}

/// A virtual persistent-memory device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MappedVPMemDevice {
    /// Device number, as in `/dev/pmem<N>`.
    pub device_number: u32,
    /// Where to mount the device.
    pub mount_path: PathBuf,
}

impl MappedVPMemDevice {
    /// Device node backing this mapping.
    #[must_use]
    pub fn device_path(&self) -> String {
        format!("{}{}", crate::constants::PMEM_DEVICE_PREFIX, self.device_number)
    }
}

/// One read-only layer of a combined root filesystem.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Layer {
    /// Path of the mounted layer.
    pub path: PathBuf,
}

/// Layers combined into a container root filesystem.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CombinedLayers {
    /// Target of the overlay mount.
    pub container_root_path: PathBuf,
    /// Lower layers, topmost first.
    #[serde(default)]
    pub layers: Vec<Layer>,
    /// Writable scratch holding `upper` and `work`; read-only when absent
    /// or empty.
    #[serde(default, deserialize_with = "non_empty_path")]
    pub scratch_path: Option<PathBuf>,
}

/// A network adapter hot-added to a namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NetworkAdapter {
    /// Adapter instance id.
    #[serde(rename = "ID")]
    pub id: String,
    /// Namespace the adapter belongs to.
    #[serde(rename = "NamespaceID")]
    pub namespace_id: String,
    /// Address allocated to the adapter; NAT is enabled when set.
    #[serde(default, rename = "IPAddress")]
    pub ip_address: String,
    /// Prefix length of the allocated address.
    #[serde(default)]
    pub prefix_length: u8,
    /// Gateway address.
    #[serde(default)]
    pub gateway_address: String,
    /// DNS search suffix.
    #[serde(default)]
    pub dns_suffix: String,
    /// Comma-separated DNS servers.
    #[serde(default)]
    pub dns_server_list: String,
    /// Prefer this adapter's routes with a low metric.
    #[serde(default)]
    pub enable_low_metric: bool,
    /// Encapsulation overhead subtracted from the MTU.
    #[serde(default)]
    pub encap_overhead: u16,
}

/// Adapter configuration in the shape the namespace helper expects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyNetworkAdapter {
    /// Whether NAT is enabled.
    #[serde(rename = "NatEnabled")]
    pub nat_enabled: bool,
    /// Address allocated to the adapter.
    #[serde(rename = "AllocatedIpAddress")]
    pub allocated_ip_address: String,
    /// Gateway address on the host side.
    #[serde(rename = "HostIpAddress")]
    pub host_ip_address: String,
    /// Prefix length of the host address.
    #[serde(rename = "HostIpPrefixLength")]
    pub host_ip_prefix_length: u8,
    /// Prefer this adapter's routes with a low metric.
    #[serde(rename = "EnableLowMetric")]
    pub enable_low_metric: bool,
    /// Encapsulation overhead subtracted from the MTU.
    #[serde(rename = "EncapOverhead")]
    pub encap_overhead: u16,
}

impl From<&NetworkAdapter> for LegacyNetworkAdapter {
    fn from(a: &NetworkAdapter) -> Self {
        Self {
            nat_enabled: !a.ip_address.is_empty(),
            allocated_ip_address: a.ip_address.clone(),
            host_ip_address: a.gateway_address.clone(),
            host_ip_prefix_length: a.prefix_length,
            enable_low_metric: a.enable_low_metric,
            encap_overhead: a.encap_overhead,
        }
    }
}

/// Payload of a modify request, tagged by resource kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceSettings {
    /// SCSI disk settings.
    MappedVirtualDisk(MappedVirtualDisk),
    /// Plan-9 share settings.
    MappedDirectory(MappedDirectory),
    /// Persistent-memory device settings.
    VPMemDevice(MappedVPMemDevice),
    /// Overlay settings.
    CombinedLayers(CombinedLayers),
    /// Network adapter settings.
    Network(NetworkAdapter),
}

impl ResourceSettings {
    /// Resource kind of this payload.
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        match self {
            Self::MappedVirtualDisk(_) => ResourceKind::MappedVirtualDisk,
            Self::MappedDirectory(_) => ResourceKind::MappedDirectory,
            Self::VPMemDevice(_) => ResourceKind::VPMemDevice,
            Self::CombinedLayers(_) => ResourceKind::CombinedLayers,
            Self::Network(_) => ResourceKind::Network,
        }
    }
}

/// A hot-plug modification of a VM-wide or per-container resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifySettingRequest {
    /// Operation to apply.
    pub request_type: RequestType,
    /// Resource payload.
    pub settings: ResourceSettings,
}

impl ModifySettingRequest {
    /// Decodes a request from its wire-level parts.
    ///
    /// The resource kind is checked first so an unknown kind fails before
    /// its payload is looked at.
    ///
    /// # Errors
    ///
    /// Returns [`GcsError::Unsupported`] for an unknown resource kind or
    /// request type, and [`GcsError::Serialization`] if the payload does
    /// not match the resource kind.
    pub fn from_raw(
        resource_type: &str,
        request_type: &str,
        settings: serde_json::Value,
    ) -> Result<Self> {
        let kind: ResourceKind = resource_type.parse()?;
        let request_type: RequestType = request_type.parse()?;
        let settings = match kind {
            ResourceKind::MappedVirtualDisk => {
                ResourceSettings::MappedVirtualDisk(serde_json::from_value(settings)?)
            }
            ResourceKind::MappedDirectory => {
                ResourceSettings::MappedDirectory(serde_json::from_value(settings)?)
            }
            ResourceKind::VPMemDevice => {
                ResourceSettings::VPMemDevice(serde_json::from_value(settings)?)
            }
            ResourceKind::CombinedLayers => {
                ResourceSettings::CombinedLayers(serde_json::from_value(settings)?)
            }
            ResourceKind::Network => ResourceSettings::Network(serde_json::from_value(settings)?),
        };
        Ok(Self {
            request_type,
            settings,
        })
    }
}
