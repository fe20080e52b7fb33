use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::estimation::EstimationPolicy;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub log_level: String,
    pub database_url: String,
    /// When true, a material may have at most one live session at a time.
    pub exclusive_sessions: bool,
    pub default_seconds_per_unit: f64,
    pub outlier_iqr_multiplier: f64,
    pub partial_observation_weight: f64,
}

impl Config {
    pub fn from_env() -> Self {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(3000);

        let host = std::env::var("HOST")
            .ok()
            .and_then(|value| value.parse::<IpAddr>().ok())
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));

        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| "sqlite://studysprint.db?mode=rwc".to_string());

        let exclusive_sessions = env_bool("EXCLUSIVE_SESSIONS").unwrap_or(true);

        let default_seconds_per_unit = env_f64("DEFAULT_SECONDS_PER_UNIT")
            .filter(|value| *value > 0.0)
            .unwrap_or(60.0);

        let outlier_iqr_multiplier = env_f64("OUTLIER_IQR_MULTIPLIER")
            .filter(|value| *value > 0.0)
            .unwrap_or(1.5);

        let partial_observation_weight = env_f64("PARTIAL_OBSERVATION_WEIGHT")
            .filter(|value| (0.0..=1.0).contains(value))
            .unwrap_or(0.0);

        Self {
            host,
            port,
            log_level,
            database_url,
            exclusive_sessions,
            default_seconds_per_unit,
            outlier_iqr_multiplier,
            partial_observation_weight,
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn estimation_policy(&self) -> EstimationPolicy {
        EstimationPolicy {
            default_seconds_per_unit: self.default_seconds_per_unit,
            outlier_iqr_multiplier: self.outlier_iqr_multiplier,
            partial_weight: self.partial_observation_weight,
            ..EstimationPolicy::default()
        }
    }
}

fn env_bool(key: &str) -> Option<bool> {
    let value = std::env::var(key).ok()?;
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_f64(key: &str) -> Option<f64> {
    std::env::var(key).ok()?.trim().parse::<f64>().ok()
}
