#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use serde::Deserialize;
use tracing::info;

/// Default config path: `~/.roomcast/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".roomcast").join("config.toml"))
}

/// Load the server config from TOML and env overrides.
#[allow(dead_code)]
pub fn load_server_config() -> anyhow::Result<ServerConfig> {
	let path = default_config_path()?;
	load_server_config_from_path(&path)
}

/// Same as `load_server_config` but with an explicit config path.
pub fn load_server_config_from_path(path: &Path) -> anyhow::Result<ServerConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = ServerConfig::from_file(file_cfg);

	apply_env_overrides(&mut cfg);

	Ok(cfg)
}

/// Server config (v1).
#[derive(Debug, Clone)]
pub struct ServerConfig {
	pub server: ServerSettings,
	pub redis: RedisSettings,
	pub events: EventSettings,
}

/// Server settings loaded by the server.
#[derive(Debug, Clone)]
pub struct ServerSettings {
	/// Optional metrics exporter bind address (host:port).
	pub metrics_bind: Option<String>,
	/// Optional health/readiness HTTP bind address (host:port).
	pub health_bind: Option<String>,
	/// Retained chat history per room.
	pub history_capacity: usize,
	/// Bounded queue in front of the history-persistence worker.
	pub persist_queue_capacity: usize,
}

/// Redis settings shared by every store client.
#[derive(Debug, Clone)]
pub struct RedisSettings {
	pub url: String,
	/// Pub/sub channel shared by all rooms.
	pub broadcast_topic: String,
}

/// Membership event log consumption settings.
#[derive(Debug, Clone)]
pub struct EventSettings {
	/// Consumer group shared by every process of a deployment.
	pub group: String,
	pub poll_interval: Duration,
	pub batch_size: usize,
	pub block_timeout: Duration,
}

impl Default for ServerSettings {
	fn default() -> Self {
		Self {
			metrics_bind: None,
			health_bind: None,
			history_capacity: 100,
			persist_queue_capacity: 256,
		}
	}
}

impl Default for RedisSettings {
	fn default() -> Self {
		Self {
			url: "redis://127.0.0.1:6379".to_string(),
			broadcast_topic: "chat".to_string(),
		}
	}
}

impl Default for EventSettings {
	fn default() -> Self {
		Self {
			group: "room-events-group".to_string(),
			poll_interval: Duration::from_millis(1000),
			batch_size: 100,
			block_timeout: Duration::from_millis(500),
		}
	}
}

impl Default for ServerConfig {
	fn default() -> Self {
		Self {
			server: ServerSettings::default(),
			redis: RedisSettings::default(),
			events: EventSettings::default(),
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	#[serde(default)]
	server: FileServerSettings,

	#[serde(default)]
	redis: FileRedisSettings,

	#[serde(default)]
	events: FileEventSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileServerSettings {
	metrics_bind: Option<String>,
	health_bind: Option<String>,
	history_capacity: Option<usize>,
	persist_queue_capacity: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileRedisSettings {
	url: Option<String>,
	broadcast_topic: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileEventSettings {
	group: Option<String>,
	poll_interval_ms: Option<u64>,
	batch_size: Option<usize>,
	block_timeout_ms: Option<u64>,
}

impl ServerConfig {
	fn from_file(file: FileConfig) -> Self {
		let defaults = ServerConfig::default();

		Self {
			server: ServerSettings {
				metrics_bind: file.server.metrics_bind.filter(|s| !s.trim().is_empty()),
				health_bind: file.server.health_bind.filter(|s| !s.trim().is_empty()),
				history_capacity: file
					.server
					.history_capacity
					.filter(|v| *v > 0)
					.unwrap_or(defaults.server.history_capacity),
				persist_queue_capacity: file
					.server
					.persist_queue_capacity
					.filter(|v| *v > 0)
					.unwrap_or(defaults.server.persist_queue_capacity),
			},
			redis: RedisSettings {
				url: file
					.redis
					.url
					.filter(|s| !s.trim().is_empty())
					.unwrap_or(defaults.redis.url),
				broadcast_topic: file
					.redis
					.broadcast_topic
					.filter(|s| !s.trim().is_empty())
					.unwrap_or(defaults.redis.broadcast_topic),
			},
			events: EventSettings {
				group: file
					.events
					.group
					.filter(|s| !s.trim().is_empty())
					.unwrap_or(defaults.events.group),
				poll_interval: file
					.events
					.poll_interval_ms
					.filter(|v| *v > 0)
					.map(Duration::from_millis)
					.unwrap_or(defaults.events.poll_interval),
				batch_size: file
					.events
					.batch_size
					.filter(|v| *v > 0)
					.unwrap_or(defaults.events.batch_size),
				block_timeout: file
					.events
					.block_timeout_ms
					.map(Duration::from_millis)
					.unwrap_or(defaults.events.block_timeout),
			},
		}
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
	if let Ok(v) = std::env::var("ROOMCAST_REDIS_URL") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.redis.url = v;
			info!("redis config: url overridden by env");
		}
	}

	if let Ok(v) = std::env::var("ROOMCAST_BROADCAST_TOPIC") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.redis.broadcast_topic = v;
			info!("redis config: broadcast_topic overridden by env");
		}
	}

	if let Ok(v) = std::env::var("ROOMCAST_METRICS_BIND") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.metrics_bind = Some(v);
			info!("server config: metrics_bind overridden by env");
		}
	}

	if let Ok(v) = std::env::var("ROOMCAST_HEALTH_BIND") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.health_bind = Some(v);
			info!("server config: health_bind overridden by env");
		}
	}

	if let Ok(v) = std::env::var("ROOMCAST_HISTORY_CAPACITY")
		&& let Ok(capacity) = v.trim().parse::<usize>()
		&& capacity > 0
	{
		cfg.server.history_capacity = capacity;
		info!(capacity, "server config: history_capacity overridden by env");
	}

	if let Ok(v) = std::env::var("ROOMCAST_PERSIST_QUEUE_CAPACITY")
		&& let Ok(capacity) = v.trim().parse::<usize>()
		&& capacity > 0
	{
		cfg.server.persist_queue_capacity = capacity;
		info!(capacity, "server config: persist_queue_capacity overridden by env");
	}

	if let Ok(v) = std::env::var("ROOMCAST_EVENT_GROUP") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.events.group = v;
			info!("events config: group overridden by env");
		}
	}

	if let Ok(v) = std::env::var("ROOMCAST_EVENT_POLL_INTERVAL_MS")
		&& let Ok(ms) = v.trim().parse::<u64>()
		&& ms > 0
	{
		cfg.events.poll_interval = Duration::from_millis(ms);
		info!(ms, "events config: poll_interval overridden by env");
	}

	if let Ok(v) = std::env::var("ROOMCAST_EVENT_BATCH_SIZE")
		&& let Ok(batch) = v.trim().parse::<usize>()
		&& batch > 0
	{
		cfg.events.batch_size = batch;
		info!(batch, "events config: batch_size overridden by env");
	}

	if let Ok(v) = std::env::var("ROOMCAST_EVENT_BLOCK_TIMEOUT_MS")
		&& let Ok(ms) = v.trim().parse::<u64>()
	{
		cfg.events.block_timeout = Duration::from_millis(ms);
		info!(ms, "events config: block_timeout overridden by env");
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn empty_file_yields_defaults() {
		let cfg = ServerConfig::from_file(toml::from_str("").expect("parse"));
		assert_eq!(cfg.redis.url, "redis://127.0.0.1:6379");
		assert_eq!(cfg.redis.broadcast_topic, "chat");
		assert_eq!(cfg.server.history_capacity, 100);
		assert_eq!(cfg.events.group, "room-events-group");
		assert_eq!(cfg.events.poll_interval, Duration::from_millis(1000));
		assert_eq!(cfg.events.batch_size, 100);
		assert_eq!(cfg.events.block_timeout, Duration::from_millis(500));
	}

	#[test]
	fn file_values_override_defaults() {
		let toml = r#"
			[server]
			health_bind = "127.0.0.1:9901"
			history_capacity = 50

			[redis]
			url = "redis://redis.internal:6379"

			[events]
			batch_size = 10
			poll_interval_ms = 250
		"#;
		let cfg = ServerConfig::from_file(toml::from_str(toml).expect("parse"));
		assert_eq!(cfg.server.health_bind.as_deref(), Some("127.0.0.1:9901"));
		assert_eq!(cfg.server.history_capacity, 50);
		assert_eq!(cfg.redis.url, "redis://redis.internal:6379");
		assert_eq!(cfg.events.batch_size, 10);
		assert_eq!(cfg.events.poll_interval, Duration::from_millis(250));
	}

	#[test]
	fn blank_strings_are_ignored() {
		let toml = r#"
			[redis]
			url = "  "
			broadcast_topic = ""
		"#;
		let cfg = ServerConfig::from_file(toml::from_str(toml).expect("parse"));
		assert_eq!(cfg.redis.url, "redis://127.0.0.1:6379");
		assert_eq!(cfg.redis.broadcast_topic, "chat");
	}
}
