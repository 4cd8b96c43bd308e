//! Daemon configuration
//!
//! Layered as defaults, then an optional file, then `REMEDY_`-prefixed
//! environment variables. Nested keys use a double underscore, e.g.
//! `REMEDY_SERVER__LISTEN_ADDR=0.0.0.0:9400`.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use remedy_loop::{
    ActionCatalog, CommandEffector, CommandSpec, EffectorRegistry, HttpProbe, InMemoryStateStore,
    JsonFileStateStore, LatencyProbe, LoopConfig, ProbeSet, SecurityHeadersProbe, StateStore,
    TcpProbe,
};
use remedy_types::{FaultCategory, Priority, RepairAction};
use serde::{Deserialize, Serialize};

use crate::error::{DaemonError, DaemonResult};

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Repair loop tuning
    #[serde(default, rename = "loop")]
    pub loop_settings: LoopSettings,

    /// Health probes, in evaluation order
    #[serde(default)]
    pub probes: Vec<ProbeConfig>,

    /// Repair action catalog
    #[serde(default)]
    pub actions: Vec<ActionConfig>,

    /// Named effectors referenced by actions
    #[serde(default)]
    pub effectors: BTreeMap<String, EffectorConfig>,

    /// Snapshot storage
    #[serde(default)]
    pub state: StateConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Start the loop as soon as the server is up
    #[serde(default)]
    pub autostart: bool,
}

impl DaemonConfig {
    /// Load configuration from file and environment
    pub fn load(path: &str) -> DaemonResult<Self> {
        let config = config::Config::builder()
            // Start with defaults
            .add_source(config::Config::try_from(&DaemonConfig::default())?)
            // Add config file if exists
            .add_source(config::File::with_name(path).required(false))
            // Add environment variables with REMEDY_ prefix
            .add_source(
                config::Environment::with_prefix("REMEDY")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Override the listen address, e.g. from the command line
    pub fn set_listen_addr(&mut self, addr: &str) -> DaemonResult<()> {
        self.server.listen_addr = addr
            .parse()
            .map_err(|e| DaemonError::Config(format!("invalid listen address '{addr}': {e}")))?;
        Ok(())
    }

    /// Probe set in declaration order
    pub fn probe_set(&self) -> ProbeSet {
        self.probes.iter().map(ProbeConfig::build).collect()
    }

    /// Validated action catalog
    pub fn catalog(&self) -> DaemonResult<ActionCatalog> {
        let actions = self.actions.iter().map(ActionConfig::to_action).collect();
        ActionCatalog::new(actions).map_err(|e| DaemonError::Config(e.to_string()))
    }

    /// Effector registry keyed by effector name
    pub fn effector_registry(&self) -> EffectorRegistry {
        let mut registry = EffectorRegistry::new();
        for (name, effector) in &self.effectors {
            registry.register(name.clone(), effector.build());
        }
        registry
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Enable CORS
    #[serde(default = "default_true")]
    pub enable_cors: bool,

    /// How long shutdown waits for the loop to settle, in milliseconds
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            enable_cors: true,
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl ServerConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Loop tuning with durations as millisecond integers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopSettings {
    pub base_interval_ms: u64,
    pub max_interval_ms: u64,
    pub emergency_stop_threshold: u32,
    pub required_clean_cycles: u32,
    pub max_cycles: u64,
    pub per_probe_timeout_ms: u64,
    pub cooldown_ms: u64,
    pub fault_retention_ms: u64,
    pub verify_passes: u32,
    pub verify_interval_ms: u64,
    pub retry_delay_ms: u64,
    pub history_limit: usize,
    pub attempt_history_limit: usize,
    pub repair_attempt_budget: u32,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self::from(&LoopConfig::default())
    }
}

impl From<&LoopConfig> for LoopSettings {
    fn from(config: &LoopConfig) -> Self {
        Self {
            base_interval_ms: millis(config.base_interval),
            max_interval_ms: millis(config.max_interval),
            emergency_stop_threshold: config.emergency_stop_threshold,
            required_clean_cycles: config.required_clean_cycles,
            max_cycles: config.max_cycles,
            per_probe_timeout_ms: millis(config.per_probe_timeout),
            cooldown_ms: millis(config.cooldown),
            fault_retention_ms: millis(config.fault_retention),
            verify_passes: config.verify_passes,
            verify_interval_ms: millis(config.verify_interval),
            retry_delay_ms: millis(config.retry_delay),
            history_limit: config.history_limit,
            attempt_history_limit: config.attempt_history_limit,
            repair_attempt_budget: config.repair_attempt_budget,
        }
    }
}

impl LoopSettings {
    /// Convert to the loop's own configuration type
    pub fn to_loop_config(&self) -> LoopConfig {
        LoopConfig {
            base_interval: Duration::from_millis(self.base_interval_ms),
            max_interval: Duration::from_millis(self.max_interval_ms),
            emergency_stop_threshold: self.emergency_stop_threshold,
            required_clean_cycles: self.required_clean_cycles,
            max_cycles: self.max_cycles,
            per_probe_timeout: Duration::from_millis(self.per_probe_timeout_ms),
            cooldown: Duration::from_millis(self.cooldown_ms),
            fault_retention: Duration::from_millis(self.fault_retention_ms),
            verify_passes: self.verify_passes,
            verify_interval: Duration::from_millis(self.verify_interval_ms),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            history_limit: self.history_limit,
            attempt_history_limit: self.attempt_history_limit,
            repair_attempt_budget: self.repair_attempt_budget,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Health probe definition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProbeConfig {
    /// GET a URL, healthy on 2xx
    Http { id: String, url: String },

    /// TCP connect to `host:port`
    Tcp { id: String, address: String },

    /// GET a URL, healthy under a latency threshold
    Latency {
        id: String,
        url: String,
        threshold_ms: u64,
    },

    /// GET a URL, healthy when required headers are present
    SecurityHeaders {
        id: String,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        headers: Option<Vec<String>>,
    },
}

impl ProbeConfig {
    fn build(&self) -> Arc<dyn remedy_loop::Probe> {
        match self {
            ProbeConfig::Http { id, url } => Arc::new(HttpProbe::new(id.as_str(), url.as_str())),
            ProbeConfig::Tcp { id, address } => {
                Arc::new(TcpProbe::new(id.as_str(), address.as_str()))
            }
            ProbeConfig::Latency {
                id,
                url,
                threshold_ms,
            } => Arc::new(LatencyProbe::new(
                id.as_str(),
                url.as_str(),
                Duration::from_millis(*threshold_ms),
            )),
            ProbeConfig::SecurityHeaders { id, url, headers } => match headers {
                Some(headers) => Arc::new(SecurityHeadersProbe::with_headers(
                    id.as_str(),
                    url.as_str(),
                    headers.iter().cloned(),
                )),
                None => Arc::new(SecurityHeadersProbe::new(id.as_str(), url.as_str())),
            },
        }
    }
}

/// Repair action definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionConfig {
    pub id: String,
    pub category: FaultCategory,
    #[serde(default = "default_priority")]
    pub priority: Priority,
    pub effector: String,
    #[serde(default = "default_action_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl ActionConfig {
    fn to_action(&self) -> RepairAction {
        let action = RepairAction::new(
            self.id.as_str(),
            self.category,
            self.priority,
            self.effector.as_str(),
        )
        .with_timeout(Duration::from_millis(self.timeout_ms))
        .with_max_retries(self.max_retries);

        self.depends_on
            .iter()
            .fold(action, |action, dep| action.depends_on(dep.as_str()))
    }
}

/// Effector definition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EffectorConfig {
    /// Run a program; an optional check command doubles as the post-condition
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        check: Option<CommandConfig>,
    },
}

/// A program invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandConfig {
    fn spec(&self) -> CommandSpec {
        CommandSpec::new(self.program.as_str(), self.args.iter().map(String::as_str))
    }
}

impl EffectorConfig {
    fn build(&self) -> Arc<dyn remedy_loop::Effector> {
        match self {
            EffectorConfig::Command {
                program,
                args,
                check,
            } => {
                let command = CommandSpec::new(program.as_str(), args.iter().map(String::as_str));
                let effector = CommandEffector::new(command);
                match check {
                    Some(check) => Arc::new(effector.with_check(check.spec())),
                    None => Arc::new(effector),
                }
            }
        }
    }
}

/// Snapshot storage backend
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StateConfig {
    /// Keep snapshots in memory only
    #[default]
    Memory,

    /// Pretty JSON file, replaced atomically on every cycle
    File { path: PathBuf },
}

impl StateConfig {
    pub fn build(&self) -> Arc<dyn StateStore> {
        match self {
            StateConfig::Memory => Arc::new(InMemoryStateStore::new()),
            StateConfig::File { path } => Arc::new(JsonFileStateStore::new(path.clone())),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9400))
}

fn default_true() -> bool {
    true
}

fn default_shutdown_grace_ms() -> u64 {
    10_000
}

fn default_priority() -> Priority {
    Priority::Medium
}

fn default_action_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    2
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
autostart = true

[server]
listen_addr = "0.0.0.0:9500"

[loop]
base_interval_ms = 5000
required_clean_cycles = 2

[[probes]]
type = "http"
id = "api"
url = "http://localhost:8080/health"

[[probes]]
type = "tcp"
id = "db"
address = "localhost:5432"

[[probes]]
type = "security_headers"
id = "headers"
url = "http://localhost:8080/"

[[actions]]
id = "restart-db"
category = "storage"
priority = "critical"
effector = "restart-db"

[[actions]]
id = "restart-api"
category = "reachability"
effector = "restart-api"
depends_on = ["restart-db"]
max_retries = 1

[effectors.restart-db]
type = "command"
program = "systemctl"
args = ["restart", "postgresql"]

[effectors.restart-api]
type = "command"
program = "systemctl"
args = ["restart", "api"]
check = { program = "systemctl", args = ["is-active", "api"] }

[state]
type = "file"
path = "/var/lib/remedy/state.json"
"#;

    fn load_sample() -> DaemonConfig {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("remedy.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        DaemonConfig::load(path.to_str().unwrap()).unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.server.listen_addr.port(), 9400);
        assert!(config.probes.is_empty());
        assert!(matches!(config.state, StateConfig::Memory));
        assert!(!config.autostart);
        assert!(config.loop_settings.to_loop_config().validate().is_ok());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = DaemonConfig::load("/nonexistent/remedy-config").unwrap();
        assert_eq!(config.logging.level, "info");
        assert_eq!(
            config.loop_settings.base_interval_ms,
            LoopSettings::default().base_interval_ms
        );
    }

    #[test]
    fn test_load_file_sections() {
        let config = load_sample();

        assert!(config.autostart);
        assert_eq!(config.server.listen_addr.port(), 9500);
        assert_eq!(config.loop_settings.base_interval_ms, 5000);
        assert_eq!(config.loop_settings.required_clean_cycles, 2);
        // Unset loop keys keep their defaults.
        assert_eq!(
            config.loop_settings.emergency_stop_threshold,
            LoopConfig::default().emergency_stop_threshold
        );
        assert_eq!(config.probes.len(), 3);
        assert!(matches!(config.state, StateConfig::File { .. }));

        let loop_config = config.loop_settings.to_loop_config();
        assert_eq!(loop_config.base_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_builds_loop_components() {
        let config = load_sample();

        let probes = config.probe_set();
        assert_eq!(probes.len(), 3);

        let catalog = config.catalog().unwrap();
        assert_eq!(catalog.len(), 2);
        let api = catalog
            .get(&remedy_types::ActionId::new("restart-api"))
            .unwrap();
        assert_eq!(api.priority, Priority::Medium);
        assert_eq!(api.max_retries, 1);
        assert_eq!(api.depends_on.len(), 1);

        let registry = config.effector_registry();
        assert!(registry.contains("restart-db"));
        assert!(registry.contains("restart-api"));
        assert!(catalog.validate_effectors(&registry).is_ok());
    }

    #[test]
    fn test_listen_addr_override() {
        let mut config = DaemonConfig::default();
        config.set_listen_addr("0.0.0.0:9600").unwrap();
        assert_eq!(config.server.listen_addr.port(), 9600);

        let err = config.set_listen_addr("not-an-address").unwrap_err();
        assert!(matches!(err, DaemonError::Config(ref msg) if msg.contains("not-an-address")));
        assert_eq!(config.server.listen_addr.port(), 9600);
    }

    #[test]
    fn test_catalog_rejects_unknown_dependency() {
        let mut config = DaemonConfig::default();
        config.actions.push(ActionConfig {
            id: "a".to_string(),
            category: FaultCategory::Storage,
            priority: Priority::High,
            effector: "fx".to_string(),
            timeout_ms: 1000,
            max_retries: 0,
            depends_on: vec!["missing".to_string()],
        });

        assert!(matches!(config.catalog(), Err(DaemonError::Config(_))));
    }
}
