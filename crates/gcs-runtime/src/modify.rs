//! Hot-plug dispatch of VM-wide resource modifications.
//!
//! Each resource payload implements [`HotPlug`]. An operation a resource
//! does not implement yields `None`, which surfaces as an unsupported
//! request.

use gcs_common::constants::{MOUNT_OPTION_DAX, MOUNT_OPTION_NOLOAD};
use gcs_common::error::{GcsError, Result};
use gcs_common::types::{
    CombinedLayers, MappedDirectory, MappedVPMemDevice, MappedVirtualDisk, ModifySettingRequest,
    NetworkAdapter, RequestType, ResourceSettings,
};
use gcs_core::filesystem::mount::{
    MountRequest, RetryPolicy, mount_layer, mount_with_timed_retry, unmount_path,
};
use gcs_core::filesystem::overlayfs::{OverlayRequest, OverlayScratch, mount_overlay};
use gcs_core::filesystem::plan9::{Plan9Share, mount_plan9_share};

use crate::host::Host;

/// Add, remove, and update capabilities of a hot-pluggable resource.
pub trait HotPlug {
    /// Attaches the resource.
    fn add(&self, _host: &Host) -> Option<Result<()>> {
        None
    }

    /// Detaches the resource.
    fn remove(&self, _host: &Host) -> Option<Result<()>> {
        None
    }

    /// Changes the attached resource in place.
    fn update(&self, _host: &Host) -> Option<Result<()>> {
        None
    }
}

/// Applies `request` against `host`.
///
/// # Errors
///
/// Returns [`GcsError::Modify`] naming the resource kind, wrapping either
/// the handler's error or an unsupported-operation error.
pub fn apply(host: &Host, request: &ModifySettingRequest) -> Result<()> {
    let resource = request.settings.kind();
    let handler: &dyn HotPlug = match &request.settings {
        ResourceSettings::MappedVirtualDisk(disk) => disk,
        ResourceSettings::MappedDirectory(dir) => dir,
        ResourceSettings::VPMemDevice(pmem) => pmem,
        ResourceSettings::CombinedLayers(layers) => layers,
        ResourceSettings::Network(adapter) => adapter,
    };
    let outcome = match request.request_type {
        RequestType::Add => handler.add(host),
        RequestType::Remove => handler.remove(host),
        RequestType::Update => handler.update(host),
    };

    outcome
        .unwrap_or_else(|| {
            Err(GcsError::Unsupported {
                message: format!(
                    "the request type \"{}\" is not supported",
                    request.request_type
                ),
            })
        })
        .map_err(|source| GcsError::Modify {
            resource,
            source: Box::new(source),
        })?;
    tracing::info!(%resource, request = %request.request_type, "host settings modified");
    Ok(())
}

impl HotPlug for MappedVirtualDisk {
    fn add(&self, host: &Host) -> Option<Result<()>> {
        Some(attach_disk(host, self))
    }

    fn remove(&self, host: &Host) -> Option<Result<()>> {
        Some(detach_disk(host, self))
    }
}

fn attach_disk(host: &Host, disk: &MappedVirtualDisk) -> Result<()> {
    let os = host.os();
    let config = host.config();
    let address = disk.scsi_address();
    let device = os
        .scsi_device_name(disk.controller, disk.lun)
        .map_err(|e| GcsError::os(format!("resolve scsi device {address}"), e))?;

    let Some(mount_path) = &disk.mount_path else {
        tracing::info!(address = %address, device = %device, "scsi disk attached without mount");
        return Ok(());
    };
    let mut request =
        MountRequest::new(device.as_str(), config.default_filesystem.as_str()).read_only(disk.read_only);
    if disk.read_only {
        request = request.option(MOUNT_OPTION_NOLOAD);
    }
    os.mkdir_all(mount_path, config.dir_mode)
        .map_err(|e| GcsError::io(mount_path, e))?;
    mount_with_timed_retry(os, &request, mount_path, RetryPolicy::from_config(config))?;

    tracing::info!(
        address = %address,
        device = %device,
        target = %mount_path.display(),
        "scsi disk mounted"
    );
    Ok(())
}

fn detach_disk(host: &Host, disk: &MappedVirtualDisk) -> Result<()> {
    let os = host.os();
    if let Some(mount_path) = &disk.mount_path {
        unmount_path(os, mount_path, true)?;
    }
    let address = disk.scsi_address();
    os.unplug_scsi_disk(&address)
        .map_err(|e| GcsError::os(format!("unplug scsi disk {address}"), e))?;
    tracing::info!(address = %address, "scsi disk removed");
    Ok(())
}

impl HotPlug for MappedDirectory {
    fn add(&self, host: &Host) -> Option<Result<()>> {
        let share = Plan9Share {
            target: &self.mount_path,
            share_name: &self.share_name,
            port: self.port,
            read_only: self.read_only,
        };
        Some(mount_plan9_share(
            host.os(),
            host.transport(),
            &share,
            host.config().dir_mode,
        ))
    }

    fn remove(&self, host: &Host) -> Option<Result<()>> {
        Some(unmount_path(host.os(), &self.mount_path, true))
    }
}

impl HotPlug for MappedVPMemDevice {
    fn add(&self, host: &Host) -> Option<Result<()>> {
        let config = host.config();
        let request = MountRequest::new(self.device_path(), config.default_filesystem.as_str())
            .read_only(true)
            .option(MOUNT_OPTION_NOLOAD)
            .option(MOUNT_OPTION_DAX);
        Some(mount_layer(host.os(), &self.mount_path, &request, config.dir_mode))
    }

    fn remove(&self, host: &Host) -> Option<Result<()>> {
        Some(unmount_path(host.os(), &self.mount_path, true))
    }
}

impl HotPlug for CombinedLayers {
    fn add(&self, host: &Host) -> Option<Result<()>> {
        Some(mount_combined_layers(host, self))
    }

    fn remove(&self, host: &Host) -> Option<Result<()>> {
        Some(unmount_path(host.os(), &self.container_root_path, true))
    }
}

fn mount_combined_layers(host: &Host, layers: &CombinedLayers) -> Result<()> {
    if layers.container_root_path.as_os_str().is_empty() {
        return Err(GcsError::InvalidSettings {
            message: "combined layers need a container root path".into(),
        });
    }
    let os = host.os();
    let mode = host.config().dir_mode;
    os.mkdir_all(&layers.container_root_path, mode)
        .map_err(|e| GcsError::io(&layers.container_root_path, e))?;

    let request = OverlayRequest {
        lower_dirs: layers.layers.iter().map(|l| l.path.clone()).collect(),
        scratch: layers
            .scratch_path
            .as_deref()
            .map(OverlayScratch::under),
        target: layers.container_root_path.clone(),
    };
    mount_overlay(os, &request, mode)
}

impl HotPlug for NetworkAdapter {
    fn add(&self, host: &Host) -> Option<Result<()>> {
        Some(host.add_network_adapter(self))
    }

    fn remove(&self, host: &Host) -> Option<Result<()>> {
        Some(host.remove_network_adapter(self))
    }
}
