//! Resolution of per-machine launch inputs: update in place or replace

use machines_api::{
    LaunchMachineInput, Machine, MachineConfig, MachineGuest, MachineState,
    METADATA_KEY_MANAGED_POSTGRES, METADATA_KEY_PLATFORM_VERSION, METADATA_KEY_PROCESS_GROUP,
    METADATA_KEY_RELEASE_ID, METADATA_KEY_RELEASE_VERSION, METADATA_KEY_TOOL_VERSION,
    PLATFORM_VERSION_V2, PROCESS_GROUP_APP, PROCESS_GROUP_RELEASE_COMMAND,
};
use tracing::debug;

use crate::deploy::volumes::VolumePool;
use crate::errors::DeployError;
use crate::models::AppConfig;
use crate::utils::tool_version;

/// Release the machines are being moved to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseInfo {
    pub id: String,
    pub version: u64,
}

/// Turns the desired app configuration into launch inputs for single machines
#[derive(Debug, Clone)]
pub struct LaunchInputResolver {
    app_config: AppConfig,
    image: String,
    release: ReleaseInfo,
    restart_only: bool,
    volumes: VolumePool,
}

impl LaunchInputResolver {
    pub fn new(
        app_config: AppConfig,
        image: impl Into<String>,
        release: ReleaseInfo,
        restart_only: bool,
        volumes: VolumePool,
    ) -> Self {
        Self {
            app_config,
            image: image.into(),
            release,
            restart_only,
            volumes,
        }
    }

    pub fn app_config(&self) -> &AppConfig {
        &self.app_config
    }

    /// Input for an existing machine, honoring restart-only mode
    pub fn resolve(&mut self, orig: &Machine) -> Result<LaunchMachineInput, DeployError> {
        if self.restart_only {
            Ok(self.launch_input_for_restart(orig))
        } else {
            self.launch_input_for_update(orig)
        }
    }

    /// Input for a brand new machine in `group`
    pub fn launch_input_for_launch(
        &mut self,
        group: &str,
        standbys: Vec<String>,
    ) -> Result<LaunchMachineInput, DeployError> {
        let region = self.app_config.primary_region.clone();
        let mut config = self.app_config.machine_config(group, None, &self.image)?;
        config.standbys = standbys;

        if let Some(mount) = config.mounts.first_mut() {
            let volume = self
                .volumes
                .pop_volume_for(&mount.name, &region)
                .ok_or_else(|| {
                    DeployError::ConfigResolution(format!(
                        "New machine in group '{}' needs an unattached volume named '{}' in region '{}'",
                        group, mount.name, region
                    ))
                })?;
            mount.volume = volume.id;
        }

        let host_dedication_id = self.app_config.host_dedication_id.clone();
        if !host_dedication_id.is_empty() {
            config
                .guest
                .get_or_insert_with(MachineGuest::default)
                .host_dedication_id = host_dedication_id;
        }

        self.set_release_data(&mut config);

        Ok(LaunchMachineInput {
            id: None,
            region,
            config,
            skip_launch: false,
            requires_replacement: false,
        })
    }

    /// Input that keeps the machine exactly as is apart from release metadata
    pub fn launch_input_for_restart(&self, orig: &Machine) -> LaunchMachineInput {
        let mut config = orig.config.clone();
        self.set_release_data(&mut config);

        LaunchMachineInput {
            id: Some(orig.id.clone()),
            region: orig.region.clone(),
            skip_launch: skip_launch(orig, &config),
            config,
            requires_replacement: false,
        }
    }

    /// Input moving an existing machine to the desired configuration. Sets
    /// `requires_replacement` when the change cannot be applied in place.
    pub fn launch_input_for_update(
        &mut self,
        orig: &Machine,
    ) -> Result<LaunchMachineInput, DeployError> {
        let group = orig.process_group().to_string();
        let mut config = self
            .app_config
            .machine_config(&group, Some(&orig.config), &self.image)?;
        self.set_release_data(&mut config);

        let host_dedication_id = self.app_config.host_dedication_id.clone();
        let mut requires_replacement =
            !host_dedication_id.is_empty() && host_dedication_id != orig.config.host_dedication_id();

        let orig_mounts = &orig.config.mounts;
        match (orig_mounts.first(), config.mounts.first_mut()) {
            (None, None) => {}
            (Some(_), None) => {
                // Mounts section removed from the app configuration
                requires_replacement = true;
            }
            (None, Some(mount)) => {
                let volume = self
                    .volumes
                    .pop_volume_for(&mount.name, &orig.region)
                    .ok_or_else(|| {
                        DeployError::ConfigResolution(format!(
                            "machine in group '{}' needs an unattached volume named '{}' in region '{}'",
                            group, mount.name, orig.region
                        ))
                    })?;
                mount.volume = volume.id;
                requires_replacement = true;
            }
            (Some(orig_mount), Some(mount)) if orig_mount.name.is_empty() => {
                let desired = mount.clone();
                *mount = orig_mount.clone();
                copy_extend_settings(mount, &desired);
            }
            (Some(orig_mount), Some(mount)) if orig_mount.name != mount.name => {
                let volume = self
                    .volumes
                    .pop_volume_for(&mount.name, &orig.region)
                    .ok_or_else(|| {
                        DeployError::ConfigResolution(format!(
                            "machine in group '{}' needs an unattached volume named '{}' in region '{}'",
                            group, mount.name, orig.region
                        ))
                    })?;
                mount.volume = volume.id;
                requires_replacement = true;
            }
            (Some(orig_mount), Some(mount)) => {
                let desired = mount.clone();
                *mount = orig_mount.clone();
                mount.path = desired.path.clone();
                copy_extend_settings(mount, &desired);
            }
        }

        if !host_dedication_id.is_empty() && host_dedication_id != orig.config.host_dedication_id()
        {
            if !orig_mounts.is_empty() && !config.mounts.is_empty() {
                return Err(DeployError::ConfigResolution(format!(
                    "can't move machine {} to dedicated host '{}' because it has an attached volume; fork the volume onto the new host first",
                    orig.id, host_dedication_id
                )));
            }
            config
                .guest
                .get_or_insert_with(MachineGuest::default)
                .host_dedication_id = host_dedication_id;
        }

        if !config.services.is_empty() && !config.standbys.is_empty() {
            config.standbys.clear();
        }

        debug!(
            "Resolved machine {} (replace: {})",
            orig.id, requires_replacement
        );

        Ok(LaunchMachineInput {
            id: Some(orig.id.clone()),
            region: orig.region.clone(),
            skip_launch: skip_launch(orig, &config),
            config,
            requires_replacement,
        })
    }

    /// Base input for the release command machine; the runner applies the
    /// command overrides on top. Never claims a volume.
    pub fn launch_input_for_release_command(
        &self,
        orig: Option<&Machine>,
    ) -> Result<LaunchMachineInput, DeployError> {
        let mut config = self.app_config.machine_config(
            PROCESS_GROUP_RELEASE_COMMAND,
            orig.map(|m| &m.config),
            &self.image,
        )?;
        config.mounts.clear();
        self.set_release_data(&mut config);

        let region = match orig {
            Some(m) if self.app_config.primary_region.is_empty() => m.region.clone(),
            _ => self.app_config.primary_region.clone(),
        };

        Ok(LaunchMachineInput {
            id: orig.map(|m| m.id.clone()),
            region,
            config,
            skip_launch: false,
            requires_replacement: false,
        })
    }

    /// Stamp the release metadata onto `config`
    pub fn set_release_data(&self, config: &mut MachineConfig) {
        let metadata = &mut config.metadata;
        metadata.insert(METADATA_KEY_RELEASE_ID.to_string(), self.release.id.clone());
        metadata.insert(
            METADATA_KEY_RELEASE_VERSION.to_string(),
            self.release.version.to_string(),
        );
        metadata.insert(METADATA_KEY_TOOL_VERSION.to_string(), tool_version());
        metadata
            .entry(METADATA_KEY_PLATFORM_VERSION.to_string())
            .or_insert_with(|| PLATFORM_VERSION_V2.to_string());
        metadata
            .entry(METADATA_KEY_PROCESS_GROUP.to_string())
            .or_insert_with(|| PROCESS_GROUP_APP.to_string());

        if self.app_config.managed_postgres {
            metadata.insert(METADATA_KEY_MANAGED_POSTGRES.to_string(), "true".to_string());
        } else {
            metadata.remove(METADATA_KEY_MANAGED_POSTGRES);
        }
    }
}

fn copy_extend_settings(mount: &mut machines_api::MachineMount, desired: &machines_api::MachineMount) {
    mount.extend_threshold_percent = desired.extend_threshold_percent;
    mount.add_size_gb = desired.add_size_gb;
    mount.size_gb_limit = desired.size_gb_limit;
}

/// Stopped standbys and stopped autoscaled machines stay stopped after an update
pub fn skip_launch(orig: &Machine, config: &MachineConfig) -> bool {
    if orig.state == MachineState::Started {
        return false;
    }
    let is_standby = !config.standbys.is_empty();
    let autoscaled = config.services.iter().any(|s| s.autoscales());
    is_standby || autoscaled
}
