//! Well-known identifiers, guest paths, and protocol defaults.

/// Container id reserved for requests that target the utility VM itself
/// rather than a specific container.
pub const UVM_CONTAINER_ID: &str = "00000000-0000-0000-0000-000000000000";

/// File name of the OCI specification written into each bundle directory.
pub const BUNDLE_CONFIG_FILE: &str = "config.json";

/// Permission bits for bundle, mount, and layer directories created by the service.
pub const DEFAULT_DIR_MODE: u32 = 0o700;

/// Filesystem type assumed for SCSI disks and pmem devices.
pub const DEFAULT_FILESYSTEM: &str = "ext4";

/// Name of the external helper that configures an adapter inside a namespace.
pub const DEFAULT_NETNS_HELPER: &str = "netnscfg";

/// Root of the SCSI device tree in sysfs.
pub const SYSFS_SCSI_DEVICES: &str = "/sys/bus/scsi/devices";

/// Root of the `VMBus` device tree in sysfs.
pub const SYSFS_VMBUS_DEVICES: &str = "/sys/bus/vmbus/devices";

/// Device node prefix for virtual persistent-memory devices.
pub const PMEM_DEVICE_PREFIX: &str = "/dev/pmem";

/// Mount option that skips journal replay on read-only ext4 mounts.
pub const MOUNT_OPTION_NOLOAD: &str = "noload";

/// Mount option enabling direct access for pmem-backed filesystems.
pub const MOUNT_OPTION_DAX: &str = "dax";

/// Exit code recorded when the exit status of a process could not be observed.
pub const UNKNOWN_EXIT_CODE: i32 = -1;

/// Returns `true` if `id` is the reserved utility VM id.
#[must_use]
pub fn is_uvm_container_id(id: &str) -> bool {
    uuid::Uuid::parse_str(id).is_ok_and(|u| u.is_nil())
}
