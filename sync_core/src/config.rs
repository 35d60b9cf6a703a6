//! Engine configuration: CLI/env via `clap`, overridable file via `serde_json`.
//!
//! Mirrors `yahoo_logic::config::load_config`'s two-step merge: parse
//! CLI/env first, then fold in a JSON file if `--config-path` names one,
//! with CLI/env winning field-by-field.

use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "camelCase")]
pub enum MetadataMode {
    None,
    Plain,
    Encrypted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "camelCase")]
pub enum ReconnectMode {
    Normal,
    Testing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "camelCase")]
pub enum StopPolicy {
    Immediate,
    LiveIndefinitely,
    AfterChangesUploaded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "camelCase")]
pub enum ClientResyncMode {
    Manual,
    DiscardLocal,
    Recover,
    RecoverOrDiscard,
}

/// Everything a caller may set, per the configuration table in the design.
#[derive(Parser, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Root directory for database, metadata, and recovery files.
    #[clap(long, env = "SYNC_BASE_FILE_PATH", default_value = "./sync-data")]
    pub base_file_path: PathBuf,

    #[clap(long, env = "SYNC_CONFIG_PATH")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "SYNC_LOG_DIR", default_value = "./logs")]
    pub log_dir: PathBuf,

    #[clap(long, env = "SYNC_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[clap(long, env = "SYNC_METADATA_MODE", value_enum, default_value_t = MetadataMode::Plain)]
    pub metadata_mode: MetadataMode,

    #[clap(long, env = "SYNC_RECONNECT_MODE", value_enum, default_value_t = ReconnectMode::Normal)]
    pub reconnect_mode: ReconnectMode,

    /// If true, share one connection per endpoint across sessions.
    #[clap(long, env = "SYNC_MULTIPLEX_SESSIONS", default_value_t = true)]
    pub multiplex_sessions: bool,

    #[clap(long, env = "SYNC_CONNECT_TIMEOUT_MS", default_value = "120000")]
    pub connect_timeout_ms: u64,

    #[clap(long, env = "SYNC_CONNECTION_LINGER_TIME_MS", default_value = "30000")]
    pub connection_linger_time_ms: u64,

    #[clap(long, env = "SYNC_PING_KEEPALIVE_PERIOD_MS", default_value = "60000")]
    pub ping_keepalive_period_ms: u64,

    #[clap(long, env = "SYNC_PONG_KEEPALIVE_TIMEOUT_MS", default_value = "120000")]
    pub pong_keepalive_timeout_ms: u64,

    /// Number of consecutive fast disconnects before backoff switches from
    /// the reconnect delay to the "fast reconnect" short delay.
    #[clap(long, env = "SYNC_FAST_RECONNECT_LIMIT", default_value = "1")]
    pub fast_reconnect_limit: u32,

    #[clap(long, env = "SYNC_STOP_POLICY", value_enum, default_value_t = StopPolicy::AfterChangesUploaded)]
    pub stop_policy: StopPolicy,

    #[clap(long, env = "SYNC_CLIENT_RESYNC_MODE", value_enum, default_value_t = ClientResyncMode::Recover)]
    pub client_resync_mode: ClientResyncMode,

    /// If true, any non-fatal protocol error resolves pending completion
    /// waits with an error rather than leaving them pending.
    #[clap(long, env = "SYNC_CANCEL_WAITS_ON_NONFATAL_ERROR", default_value_t = false)]
    pub cancel_waits_on_nonfatal_error: bool,

    #[clap(long, env = "SYNC_SSL_TRUST_CERTIFICATE_PATH")]
    pub ssl_trust_certificate_path: Option<PathBuf>,

    #[clap(long, env = "SYNC_PROXY_URL")]
    pub proxy_config: Option<String>,

    /// Drain chunk size for pending flexible-sync bootstraps.
    #[clap(long, env = "SYNC_FLX_BOOTSTRAP_BATCH_SIZE_BYTES", default_value = "1048576")]
    pub flx_bootstrap_batch_size_bytes: u64,

    /// Sync server host, used to build the `ServerEndpoint` connections are
    /// keyed and reused by.
    #[clap(long, env = "SYNC_SERVER_HOST", default_value = "127.0.0.1")]
    pub server_host: String,

    #[clap(long, env = "SYNC_SERVER_PORT", default_value = "9090")]
    pub server_port: u16,

    #[clap(long, env = "SYNC_SERVER_USE_TLS", default_value_t = false)]
    pub server_use_tls: bool,

    /// File name of the realm this client synchronizes, resolved under
    /// `base_file_path`.
    #[clap(long, env = "SYNC_REALM_FILE_NAME", default_value = "default.realm")]
    pub realm_file_name: String,

    /// If true, bind with a flexible-sync subscription set rather than a
    /// fixed partition value.
    #[clap(long, env = "SYNC_FLEXIBLE_SYNC", default_value_t = true)]
    pub flexible_sync: bool,
}

impl std::fmt::Display for MetadataMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}
impl std::fmt::Display for ReconnectMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}
impl std::fmt::Display for StopPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}
impl std::fmt::Display for ClientResyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl EngineConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
    pub fn connection_linger_time(&self) -> Duration {
        Duration::from_millis(self.connection_linger_time_ms)
    }
    pub fn ping_keepalive_period(&self) -> Duration {
        Duration::from_millis(self.ping_keepalive_period_ms)
    }
    pub fn pong_keepalive_timeout(&self) -> Duration {
        Duration::from_millis(self.pong_keepalive_timeout_ms)
    }

    pub fn history_path(&self) -> PathBuf {
        self.base_file_path.join("realm.history")
    }
    pub fn metadata_path(&self) -> PathBuf {
        self.base_file_path.join("metadata.realm")
    }
    pub fn fresh_copy_path(&self, realm_path: &std::path::Path) -> PathBuf {
        let mut name = realm_path.as_os_str().to_os_string();
        name.push(".fresh");
        PathBuf::from(name)
    }

    pub fn realm_path(&self) -> PathBuf {
        self.base_file_path.join(&self.realm_file_name)
    }

    pub fn endpoint(&self) -> crate::model::ServerEndpoint {
        let envelope = if self.server_use_tls {
            crate::model::ProtocolEnvelope::TlsWs
        } else {
            crate::model::ProtocolEnvelope::PlainWs
        };
        crate::model::ServerEndpoint::new(envelope, self.server_host.clone(), self.server_port)
    }
}

/// Parses CLI/env, then merges a JSON config file over it if `--config-path`
/// was given, with CLI/env values winning field by field.
pub fn load_config() -> EngineConfig {
    let cli_config = EngineConfig::parse();

    let config_from_file = cli_config.config_path.as_ref().and_then(|path| {
        fs::read_to_string(path)
            .ok()
            .and_then(|c| serde_json::from_str::<EngineConfig>(&c).ok())
    });

    match config_from_file {
        Some(file_config) => EngineConfig {
            base_file_path: cli_config.base_file_path,
            config_path: cli_config.config_path.or(file_config.config_path),
            log_dir: cli_config.log_dir,
            log_level: cli_config.log_level,
            metadata_mode: cli_config.metadata_mode,
            reconnect_mode: cli_config.reconnect_mode,
            multiplex_sessions: cli_config.multiplex_sessions,
            connect_timeout_ms: cli_config.connect_timeout_ms,
            connection_linger_time_ms: cli_config.connection_linger_time_ms,
            ping_keepalive_period_ms: cli_config.ping_keepalive_period_ms,
            pong_keepalive_timeout_ms: cli_config.pong_keepalive_timeout_ms,
            fast_reconnect_limit: cli_config.fast_reconnect_limit,
            stop_policy: cli_config.stop_policy,
            client_resync_mode: cli_config.client_resync_mode,
            cancel_waits_on_nonfatal_error: cli_config.cancel_waits_on_nonfatal_error,
            ssl_trust_certificate_path: cli_config
                .ssl_trust_certificate_path
                .or(file_config.ssl_trust_certificate_path),
            proxy_config: cli_config.proxy_config.or(file_config.proxy_config),
            flx_bootstrap_batch_size_bytes: cli_config.flx_bootstrap_batch_size_bytes,
            server_host: cli_config.server_host,
            server_port: cli_config.server_port,
            server_use_tls: cli_config.server_use_tls,
            realm_file_name: cli_config.realm_file_name,
            flexible_sync: cli_config.flexible_sync,
        },
        None => cli_config,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_durations_match_millis() {
        let cfg = EngineConfig::parse_from(["test"]);
        assert_eq!(cfg.connect_timeout(), Duration::from_millis(120_000));
        assert_eq!(cfg.pong_keepalive_timeout(), Duration::from_millis(120_000));
    }

    #[test]
    fn fresh_copy_path_is_sibling_with_suffix() {
        let cfg = EngineConfig::parse_from(["test"]);
        let realm = PathBuf::from("/data/default.realm");
        assert_eq!(cfg.fresh_copy_path(&realm), PathBuf::from("/data/default.realm.fresh"));
    }
}
