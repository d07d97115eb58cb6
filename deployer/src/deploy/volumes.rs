//! Unattached volumes available to new machines

use machines_api::Volume;

/// Volumes that can be handed to machines created during this deployment
#[derive(Debug, Clone, Default)]
pub struct VolumePool {
    volumes: Vec<Volume>,
}

impl VolumePool {
    /// Keep only volumes that are not attached and not being destroyed
    pub fn new(volumes: Vec<Volume>) -> Self {
        Self {
            volumes: volumes.into_iter().filter(Volume::is_unattached).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }

    /// Take a volume matching `name` in `region`, so it is never handed out twice
    pub fn pop_volume_for(&mut self, name: &str, region: &str) -> Option<Volume> {
        let index = self
            .volumes
            .iter()
            .position(|v| v.name == name && v.region == region)?;
        Some(self.volumes.remove(index))
    }
}
