use std::{env, path::PathBuf};

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_DATA_DIR: &str = "/data";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Configuración del master, leída una vez del entorno al arrancar:
/// - MASTER_BIND_ADDR (default 0.0.0.0:8080)
/// - DATA_DIR (default /data)
/// - MAX_UPLOAD_BYTES (default 10 MiB)
#[derive(Debug, Clone, PartialEq)]
pub struct MasterConfig {
    pub bind_addr: String,
    pub data_dir: PathBuf,
    pub max_upload_bytes: usize,
}

impl MasterConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            bind_addr: get("MASTER_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            data_dir: get("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            max_upload_bytes: get("MAX_UPLOAD_BYTES")
                .and_then(|s| s.parse::<usize>().ok())
                .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
        }
    }
}
