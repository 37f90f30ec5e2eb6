//! Persistent `StationConfig` and its nested value objects (§3).

use serde::{Deserialize, Serialize};

use super::ocpp_version::OcppVersion;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthProfile {
    None,
    Basic,
    Bearer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsmsAuth {
    pub profile: AuthProfile,
    pub username: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
}

impl Default for CsmsAuth {
    fn default() -> Self {
        Self {
            profile: AuthProfile::None,
            username: None,
            password: None,
            token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    pub connector_id: u32,
    pub connector_type: String,
    pub max_power_w: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeterValuesConfig {
    /// Sample period in seconds; 60 by default per the meter-value simulator (§4.4).
    pub sample_interval_secs: u64,
}

impl Default for MeterValuesConfig {
    fn default() -> Self {
        Self {
            sample_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub heartbeat_interval_secs: u64,
    pub boot_delay_ms: u64,
    /// When true, per-tick power is drawn uniformly from [5000, 7500] W.
    /// When false, `energy_delivery_rate_w` is used verbatim every tick.
    pub randomize_meter_values: bool,
    pub energy_delivery_rate_w: u32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 300,
            boot_delay_ms: 0,
            randomize_meter_values: true,
            energy_delivery_rate_w: 6000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareDescriptor {
    pub vendor: String,
    pub model: String,
    pub serial_number: Option<String>,
    pub firmware_version: Option<String>,
}

/// Derived fields the runtime is allowed to mutate directly (§3).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RuntimeStatus {
    pub connection_status: String,
    pub last_heartbeat: Option<chrono::DateTime<chrono::Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConfig {
    pub station_id: String,
    pub protocol_version: OcppVersion,
    pub hardware: HardwareDescriptor,
    pub connectors: Vec<ConnectorConfig>,
    pub csms_url: String,
    pub auth: CsmsAuth,
    pub meter_values: MeterValuesConfig,
    pub simulation: SimulationConfig,
    pub supported_profiles: Vec<String>,
    pub tags: Vec<String>,
    pub auto_start: bool,
    #[serde(default)]
    pub runtime: RuntimeStatus,
}

impl StationConfig {
    /// Validates the invariants the operator API must enforce before
    /// persisting: at least one connector, unique connector ids.
    pub fn validate(&self) -> Result<(), String> {
        if self.connectors.is_empty() {
            return Err("station must have at least one connector".into());
        }
        let mut ids: Vec<u32> = self.connectors.iter().map(|c| c.connector_id).collect();
        ids.sort_unstable();
        if ids.windows(2).any(|w| w[0] == w[1]) {
            return Err("connector ids must be unique per station".into());
        }
        Ok(())
    }
}
