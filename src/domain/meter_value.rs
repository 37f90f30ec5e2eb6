//! `MeterValueSample` entity (§3): append-only time-series point.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Measurand {
    EnergyActiveImportRegister,
    PowerActiveImport,
    StateOfCharge,
}

impl Measurand {
    pub fn ocpp_name(self) -> &'static str {
        match self {
            Self::EnergyActiveImportRegister => "Energy.Active.Import.Register",
            Self::PowerActiveImport => "Power.Active.Import",
            Self::StateOfCharge => "SoC",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            Self::EnergyActiveImportRegister => "Wh",
            Self::PowerActiveImport => "W",
            Self::StateOfCharge => "Percent",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeterValueSample {
    pub timestamp: DateTime<Utc>,
    pub station_id: String,
    pub connector_id: u32,
    pub transaction_id: Option<String>,
    pub measurand: Measurand,
    pub value: f64,
    pub unit: String,
    pub context: String,
    pub location: String,
}

impl MeterValueSample {
    pub fn new(
        station_id: impl Into<String>,
        connector_id: u32,
        transaction_id: Option<String>,
        measurand: Measurand,
        value: f64,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            station_id: station_id.into(),
            connector_id,
            transaction_id,
            measurand,
            value,
            unit: measurand.unit().to_string(),
            context: "Sample.Periodic".to_string(),
            location: "Outlet".to_string(),
        }
    }
}
