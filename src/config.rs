use lazy_static::lazy_static;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub struct Config {
    pub data_dir: String,
    pub viz_addr: String,
    pub tick_rate: Duration,
    pub time_multiplier: f64,
    pub response_timeout: Duration,
    pub suggest_tries: u32,
    pub reservation_timeout: Duration,
    pub matrix_divisions: usize,
    pub capacity_multiplier: u32,
}

lazy_static! {
    pub static ref CONFIG: Config = {
        let tick_rate_ms = match std::env::var("TICK_RATE_MS") {
            Ok(val) => val.parse().expect("Invalid TICK_RATE_MS"),
            Err(_) => 30,
        };
        let time_multiplier = match std::env::var("TIME_MULTIPLIER") {
            Ok(val) => val.parse().expect("Invalid TIME_MULTIPLIER"),
            Err(_) => 100.0,
        };
        let reservation_timeout_ms = match std::env::var("RESERVATION_TIMEOUT_MS") {
            Ok(val) => val.parse().expect("Invalid RESERVATION_TIMEOUT_MS"),
            Err(_) => 5000,
        };
        Config {
            data_dir: std::env::var("DATA_DIR").unwrap_or("data".to_string()),
            viz_addr: std::env::var("VIZ_ADDR").unwrap_or("0.0.0.0:8080".to_string()),
            tick_rate: Duration::from_millis(tick_rate_ms),
            time_multiplier,
            response_timeout: Duration::from_secs(5),
            suggest_tries: 3,
            reservation_timeout: Duration::from_millis(reservation_timeout_ms),
            matrix_divisions: 5,
            capacity_multiplier: 3,
        }
    };
}

/// Runtime knobs threaded to every agent. Defaults mirror `CONFIG`; tests
/// tighten the timings to keep scenarios fast.
#[derive(Debug, Clone, Copy)]
pub struct SimParams {
    /// wall-clock duration of one tick
    pub tick_rate: Duration,
    /// simulated seconds elapsing per wall-clock second
    pub time_multiplier: f64,
    pub response_timeout: Duration,
    pub suggest_tries: u32,
    pub reservation_timeout: Duration,
    pub matrix_divisions: usize,
    pub capacity_multiplier: u32,
}

impl SimParams {
    pub fn from_config() -> Self {
        Self {
            tick_rate: CONFIG.tick_rate,
            time_multiplier: CONFIG.time_multiplier,
            response_timeout: CONFIG.response_timeout,
            suggest_tries: CONFIG.suggest_tries,
            reservation_timeout: CONFIG.reservation_timeout,
            matrix_divisions: CONFIG.matrix_divisions,
            capacity_multiplier: CONFIG.capacity_multiplier,
        }
    }

    /// Simulated meters travelled in one tick at the given velocity (m/s).
    pub fn step_distance(&self, velocity: f64) -> f64 {
        velocity * self.time_multiplier * self.tick_rate.as_secs_f64()
    }
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            tick_rate: Duration::from_millis(30),
            time_multiplier: 100.0,
            response_timeout: Duration::from_secs(5),
            suggest_tries: 3,
            reservation_timeout: Duration::from_secs(5),
            matrix_divisions: 5,
            capacity_multiplier: 3,
        }
    }
}

/// Credentials for the external XMPP user-provisioning step. The simulation
/// core never reads these; they are loaded here so the bootstrap holds them
/// as an explicit value instead of process-global state.
#[derive(Debug, Clone, Deserialize)]
pub struct GlobalConfig {
    pub docker_container_id: String,
    pub prosody_password: String,
}

impl GlobalConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&raw)?;
        Ok(config)
    }
}
