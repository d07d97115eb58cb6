use serde::{Deserialize, Serialize};

/// A persistent volume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub id: String,

    pub name: String,

    pub region: String,

    #[serde(default)]
    pub state: String,

    #[serde(default)]
    pub size_gb: u32,

    /// Machine the volume is attached to, if any
    #[serde(default)]
    pub attached_machine_id: Option<String>,
}

impl Volume {
    /// Whether the volume can be attached to a new machine
    pub fn is_unattached(&self) -> bool {
        self.attached_machine_id.as_deref().unwrap_or("").is_empty()
            && !matches!(self.state.as_str(), "destroyed" | "destroying" | "pending_destroy")
    }
}
