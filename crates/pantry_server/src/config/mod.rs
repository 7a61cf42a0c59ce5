#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, anyhow};
use pantry_util::secret::SecretString;
use serde::Deserialize;
use tracing::info;

/// Default config path: `~/.pantry/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".pantry").join("config.toml"))
}

/// Load the server config from TOML and env overrides.
pub fn load_server_config_from_path(path: &Path) -> anyhow::Result<ServerConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = ServerConfig::from_file(file_cfg);

	apply_env_overrides(&mut cfg);

	Ok(cfg)
}

/// Server config (v1).
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
	pub server: ServerSettings,
	pub persistence: PersistenceSettings,
	pub chat: ChatSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
	/// Optional metrics exporter bind address (host:port).
	pub metrics_bind: Option<String>,
	/// Optional health/readiness HTTP bind address (host:port).
	pub health_bind: Option<String>,
	/// HMAC secret for stateless access tokens. Required for identify.
	pub auth_hmac_secret: Option<SecretString>,
	/// Per-connection push queue capacity.
	pub push_queue_capacity: usize,
	/// Seconds a connection may idle before sending its identify frame.
	pub identify_timeout_secs: u64,
}

impl Default for ServerSettings {
	fn default() -> Self {
		Self {
			metrics_bind: None,
			health_bind: None,
			auth_hmac_secret: None,
			push_queue_capacity: 256,
			identify_timeout_secs: 10,
		}
	}
}

#[derive(Debug, Clone, Default)]
pub struct PersistenceSettings {
	/// Enable persistence; without it the entity store is in-memory.
	pub enabled: bool,
	/// Database URL (sqlite:).
	pub database_url: Option<String>,
}

/// Chat-specific settings: seeded channels and room capability overrides.
#[derive(Debug, Clone)]
pub struct ChatSettings {
	/// room -> display name, created at startup if missing.
	pub channels: BTreeMap<String, String>,
	/// room -> capability overrides merged over the built-in map.
	pub room_capabilities: BTreeMap<String, String>,
}

impl Default for ChatSettings {
	fn default() -> Self {
		let mut channels = BTreeMap::new();
		for (room, display_name) in [
			("general", "General"),
			("hosts", "Hosts"),
			("drivers", "Drivers"),
			("core_team", "Core Team"),
		] {
			channels.insert(room.to_string(), display_name.to_string());
		}
		Self {
			channels,
			room_capabilities: BTreeMap::new(),
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	#[serde(default)]
	server: FileServerSettings,

	#[serde(default)]
	persistence: FilePersistenceSettings,

	#[serde(default)]
	chat: FileChatSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileServerSettings {
	metrics_bind: Option<String>,
	health_bind: Option<String>,
	auth_hmac_secret: Option<String>,
	push_queue_capacity: Option<usize>,
	identify_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FilePersistenceSettings {
	enabled: Option<bool>,
	database_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileChatSettings {
	#[serde(default)]
	channels: BTreeMap<String, String>,

	#[serde(default)]
	room_capabilities: BTreeMap<String, String>,
}

impl ServerConfig {
	fn from_file(file: FileConfig) -> Self {
		let defaults = ServerSettings::default();
		let chat_defaults = ChatSettings::default();

		Self {
			server: ServerSettings {
				metrics_bind: file.server.metrics_bind.filter(|s| !s.trim().is_empty()),
				health_bind: file.server.health_bind.filter(|s| !s.trim().is_empty()),
				auth_hmac_secret: file
					.server
					.auth_hmac_secret
					.filter(|s| !s.trim().is_empty())
					.map(SecretString::new),
				push_queue_capacity: file
					.server
					.push_queue_capacity
					.filter(|v| *v > 0)
					.unwrap_or(defaults.push_queue_capacity),
				identify_timeout_secs: file
					.server
					.identify_timeout_secs
					.filter(|v| *v > 0)
					.unwrap_or(defaults.identify_timeout_secs),
			},
			persistence: PersistenceSettings {
				enabled: file.persistence.enabled.unwrap_or(false),
				database_url: file.persistence.database_url.filter(|s| !s.trim().is_empty()),
			},
			chat: ChatSettings {
				channels: if file.chat.channels.is_empty() {
					chat_defaults.channels
				} else {
					file.chat.channels
				},
				room_capabilities: file.chat.room_capabilities,
			},
		}
	}
}

fn parse_env_bool(v: &str) -> Option<bool> {
	match v.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Some(true),
		"0" | "false" | "no" | "off" => Some(false),
		_ => None,
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).context("parse TOML")?;
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn apply_env_overrides(cfg: &mut ServerConfig) {
	if let Ok(v) = std::env::var("PANTRY_SERVER_AUTH_HMAC_SECRET") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.auth_hmac_secret = Some(SecretString::new(v));
			info!("server auth: auth_hmac_secret overridden by env");
		}
	}

	if let Ok(v) = std::env::var("PANTRY_METRICS_BIND") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.metrics_bind = Some(v);
			info!("server config: metrics_bind overridden by env");
		}
	}

	if let Ok(v) = std::env::var("PANTRY_HEALTH_BIND") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.health_bind = Some(v);
			info!("server config: health_bind overridden by env");
		}
	}

	if let Ok(v) = std::env::var("PANTRY_PUSH_QUEUE_CAPACITY")
		&& let Ok(capacity) = v.trim().parse::<usize>()
		&& capacity > 0
	{
		cfg.server.push_queue_capacity = capacity;
		info!(capacity, "server config: push_queue_capacity overridden by env");
	}

	if let Ok(v) = std::env::var("PANTRY_IDENTIFY_TIMEOUT_SECS")
		&& let Ok(secs) = v.trim().parse::<u64>()
		&& secs > 0
	{
		cfg.server.identify_timeout_secs = secs;
		info!(secs, "server config: identify_timeout_secs overridden by env");
	}

	if let Ok(v) = std::env::var("PANTRY_PERSISTENCE_ENABLED")
		&& let Some(enabled) = parse_env_bool(&v)
	{
		cfg.persistence.enabled = enabled;
		info!(enabled, "persistence: enabled overridden by env");
	}

	if let Ok(v) = std::env::var("PANTRY_PERSISTENCE_DATABASE_URL") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.persistence.database_url = Some(v);
			info!("persistence: database_url overridden by env");
		}
	}
}
