use serde::{Deserialize, Serialize};

/// Host-side emulator settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmuConfig {
    /// Frames per second the host drives `run_frame` at
    pub fps: u32,
    /// Allow runtime flash writes (`STF`, firmware write service)
    pub flash_write_enabled: bool,
}

impl Default for VmuConfig {
    fn default() -> Self {
        VmuConfig {
            fps: 60,
            flash_write_enabled: false,
        }
    }
}
