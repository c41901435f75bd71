use rand::Rng;
use serde::Serialize;

/// Flat telemetry as sent by helmet/wearable firmware.
#[derive(Debug, Clone, Serialize)]
pub struct Telemetry {
    pub temp: f64,
    pub gas: f64,
    pub vibration: f64,
    pub fall: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Normal,
    GasLeak,
    HeatWave,
    Fall,
}

impl Condition {
    pub fn sample(self, rng: &mut impl Rng) -> Telemetry {
        let round = |v: f64| (v * 10.0).round() / 10.0;
        match self {
            Condition::Normal => Telemetry {
                temp: round(rng.gen_range(20.0..28.0)),
                gas: round(rng.gen_range(100.0..300.0)),
                vibration: round(rng.gen_range(0.0..50.0)),
                fall: false,
            },
            Condition::GasLeak => Telemetry {
                temp: round(rng.gen_range(25.0..30.0)),
                gas: round(rng.gen_range(750.0..1200.0)),
                vibration: round(rng.gen_range(0.0..50.0)),
                fall: false,
            },
            Condition::HeatWave => Telemetry {
                temp: round(rng.gen_range(39.0..45.0)),
                gas: round(rng.gen_range(200.0..400.0)),
                vibration: round(rng.gen_range(0.0..50.0)),
                fall: false,
            },
            Condition::Fall => Telemetry {
                temp: round(rng.gen_range(20.0..28.0)),
                gas: round(rng.gen_range(100.0..300.0)),
                vibration: round(rng.gen_range(100.0..200.0)),
                fall: true,
            },
        }
    }

    /// Mostly normal, with occasional hazards.
    pub fn random(rng: &mut impl Rng) -> Self {
        match rng.gen_range(0..100) {
            0..=4 => Condition::GasLeak,
            5..=9 => Condition::HeatWave,
            10 => Condition::Fall,
            _ => Condition::Normal,
        }
    }
}

/// The scripted walkthrough: normal, gas leak, recovery, heat stress, one fall.
pub fn demo_script() -> Vec<(&'static str, Condition, usize)> {
    vec![
        ("Normal operation", Condition::Normal, 10),
        ("GAS LEAK", Condition::GasLeak, 5),
        ("Returning to normal", Condition::Normal, 5),
        ("HEAT STRESS", Condition::HeatWave, 5),
        ("MAN DOWN", Condition::Fall, 1),
    ]
}
