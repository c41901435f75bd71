use crate::model::{AlertType, Severity};
use serde_json::Value;

const GAS_CRITICAL_PPM: f64 = 700.0;
const TEMP_CRITICAL_C: f64 = 38.0;
const TEMP_CAUTION_C: f64 = 31.0;
const VIBRATION_HIGH: f64 = 500.0;

/// A rule match, not yet persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Hazard {
    pub alert_type: AlertType,
    pub severity: Severity,
    pub message: &'static str,
}

impl Hazard {
    fn new(alert_type: AlertType, severity: Severity, message: &'static str) -> Self {
        Self {
            alert_type,
            severity,
            message,
        }
    }
}

/// Evaluates a payload against the hazard rule table.
///
/// Rules run in a fixed order (gas, temp, fall, vibration) and each fires
/// independently. A field that is absent or has the wrong JSON type skips its
/// rule; a payload that is not an object yields nothing.
pub fn evaluate(payload: &Value) -> Vec<Hazard> {
    let mut hazards = Vec::new();

    if let Some(gas) = number(payload, "gas") {
        if gas > GAS_CRITICAL_PPM {
            hazards.push(Hazard::new(
                AlertType::GasHazard,
                Severity::Critical,
                "Dangerous Gas Levels (>700 PPM) detected! Evacuate!",
            ));
        }
    }

    if let Some(temp) = number(payload, "temp") {
        if temp > TEMP_CRITICAL_C {
            hazards.push(Hazard::new(
                AlertType::HeatStress,
                Severity::Critical,
                "Critical Heat (>38°C)! Mandatory removal from area.",
            ));
        } else if temp > TEMP_CAUTION_C {
            hazards.push(Hazard::new(
                AlertType::HeatStress,
                Severity::Caution,
                "High Heat (>31°C). Hydration and rest suggested.",
            ));
        }
    }

    if flag(payload, "fall") == Some(true) {
        hazards.push(Hazard::new(
            AlertType::ManDown,
            Severity::Critical,
            "Fall detected! Man-down event initiated.",
        ));
    }

    if let Some(vibration) = number(payload, "vibration") {
        if vibration > VIBRATION_HIGH {
            hazards.push(Hazard::new(
                AlertType::StructuralWarning,
                Severity::High,
                "High-frequency vibration detected!",
            ));
        }
    }

    hazards
}

/// Numeric field, or `None` when absent or not a JSON number. Numeric strings do not count.
fn number(payload: &Value, key: &str) -> Option<f64> {
    payload.get(key).and_then(Value::as_f64)
}

fn flag(payload: &Value, key: &str) -> Option<bool> {
    payload.get(key).and_then(Value::as_bool)
}
