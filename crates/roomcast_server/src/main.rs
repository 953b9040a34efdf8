#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context as _;
use roomcast_store::{RedisBroadcast, RedisCapacityStore, RedisEventLog, RedisHistoryBuffer};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use roomcast_server::adapters::{NullHistoryPersistence, NullRoomStore, NullUserDirectory};
use roomcast_server::server::admission::AdmissionController;
use roomcast_server::server::fanout::spawn_fanout;
use roomcast_server::server::health::{HealthState, spawn_health_server};
use roomcast_server::server::persist::spawn_persist_worker;
use roomcast_server::server::reconciler::Reconciler;
use roomcast_server::server::registry::ConnectionRegistry;
use roomcast_server::server::{ServerContext, serve};

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: roomcast_server [--bind ws://host:port]\n\
\n\
Options:\n\
\t--bind    Bind endpoint (default: ws://127.0.0.1:9800)\n\
\t         Format: ws://host:port or host:port\n\
\t--help   Show this help\n\
"
	);
	std::process::exit(2)
}

fn parse_args() -> SocketAddr {
	let mut bind_endpoint = "ws://127.0.0.1:9800".to_string();

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--bind" | "--listen" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--bind must be non-empty (expected ws://host:port)");
					usage_and_exit();
				}
				bind_endpoint = v;
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	let raw = bind_endpoint.strip_prefix("ws://").unwrap_or(&bind_endpoint);
	raw.parse::<SocketAddr>().unwrap_or_else(|e| {
		eprintln!("invalid bind endpoint {bind_endpoint}: {e}");
		usage_and_exit();
	})
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,roomcast_server=debug".to_string());

	tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(tracing_subscriber::fmt::layer().with_target(false))
		.init();
}

fn init_metrics(bind: Option<&str>) {
	let Some(bind) = bind else {
		return;
	};

	match bind.parse::<std::net::SocketAddr>() {
		Ok(addr) => {
			if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
				.with_http_listener(addr)
				.install()
			{
				warn!(error = %e, "failed to start metrics exporter");
			} else {
				info!(%addr, "metrics exporter listening");
			}
		}
		Err(e) => {
			warn!(error = %e, %bind, "invalid metrics bind address (expected host:port)");
		}
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();

	let bind_addr = parse_args();

	let config_path = roomcast_server::config::default_config_path()?;
	let cfg = roomcast_server::config::load_server_config_from_path(&config_path)?;
	info!(path = %config_path.display(), "loaded server config (toml + env overrides)");

	init_metrics(cfg.server.metrics_bind.as_deref());

	let health_state = HealthState::new();
	if let Some(bind) = cfg.server.health_bind.as_deref() {
		match bind.parse::<std::net::SocketAddr>() {
			Ok(addr) => {
				spawn_health_server(addr, health_state.clone());
				info!(%addr, "health server listening");
			}
			Err(e) => warn!(error = %e, %bind, "invalid health bind address (expected host:port)"),
		}
	}

	let client = redis::Client::open(cfg.redis.url.as_str()).context("open redis client")?;
	let conn = redis::aio::ConnectionManager::new(client.clone())
		.await
		.context("connect to redis")?;
	info!(url = %cfg.redis.url, "connected to redis");

	// Durable room/user/archive collaborators live in an external service;
	// the no-op adapters stand in until one is wired up.
	let rooms = Arc::new(NullRoomStore::new());
	let users = Arc::new(NullUserDirectory::new());
	let archive = Arc::new(NullHistoryPersistence::new());

	let (persist, _persist_task) = spawn_persist_worker(archive, cfg.server.persist_queue_capacity);

	let events = Arc::new(RedisEventLog::new(conn.clone()));
	let ctx = Arc::new(ServerContext {
		registry: ConnectionRegistry::new(),
		admission: AdmissionController::new(Arc::new(RedisCapacityStore::new(conn.clone())), rooms.clone()),
		fabric: Arc::new(RedisBroadcast::new(client, conn.clone(), cfg.redis.broadcast_topic.clone())),
		history: Arc::new(RedisHistoryBuffer::new(conn, cfg.server.history_capacity)),
		events: events.clone(),
		rooms: rooms.clone(),
		users,
		persist,
	});

	let _fanout_task = spawn_fanout(Arc::clone(&ctx));
	let _reconciler_task = Reconciler::new(events, rooms, cfg.events.clone()).spawn();

	let listener = TcpListener::bind(bind_addr)
		.await
		.with_context(|| format!("bind {bind_addr}"))?;
	info!(%bind_addr, "websocket endpoint ready");

	health_state.mark_ready();

	serve(listener, ctx).await
}
