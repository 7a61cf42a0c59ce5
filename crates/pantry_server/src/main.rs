#![forbid(unsafe_code)]

mod config;
mod server;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use pantry_chat::{ConversationService, PermissionResolver, PresenceConfig, PresenceRegistry};
use pantry_store::{AuditService, EntityStore, InMemoryStore, SqliteStore};
use pantry_util::endpoint::TcpEndpoint;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::server::connection::{ConnectionSettings, handle_connection};
use crate::server::health::{HealthState, spawn_health_server};

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: pantry_server [--bind tcp://host:port]\n\
\n\
Options:\n\
\t--bind    Bind endpoint (default: tcp://127.0.0.1:18310)\n\
\t         Format: tcp://host:port\n\
\t--help   Show this help\n\
"
	);
	std::process::exit(2)
}

fn parse_args() -> SocketAddr {
	let mut bind_endpoint = "tcp://127.0.0.1:18310".to_string();

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--bind" | "--listen" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--bind must be non-empty (expected tcp://host:port)");
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

	let bind = TcpEndpoint::parse(&bind_endpoint).unwrap_or_else(|e| {
		eprintln!("{e}");
		usage_and_exit();
	});

	let addr: SocketAddr = bind.to_socket_addr_if_ip_literal().unwrap_or_else(|e| {
		eprintln!("{e}");
		usage_and_exit();
	});

	addr
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,pantry_server=debug".to_string());

	let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
		.ok()
		.map(|v| v.trim().to_string())
		.filter(|v| !v.is_empty());
	let base = tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(tracing_subscriber::fmt::layer().with_target(false));

	if let Some(endpoint) = otlp_endpoint {
		use opentelemetry::global;
		use opentelemetry::trace::TracerProvider as _;
		use opentelemetry_otlp::WithExportConfig;

		match opentelemetry_otlp::SpanExporter::builder()
			.with_tonic()
			.with_endpoint(endpoint.clone())
			.build()
		{
			Ok(exporter) => {
				let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
					.with_batch_exporter(exporter)
					.build();
				let tracer = tracer_provider.tracer("pantry_server");
				global::set_tracer_provider(tracer_provider);

				let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
				base.with(otel_layer).init();
				info!(endpoint = %endpoint, "otlp tracing enabled");
			}
			Err(e) => {
				base.init();
				warn!(error = %e, "failed to initialize otlp tracing");
			}
		}
	} else {
		base.init();
	}
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

	let config_path = crate::config::default_config_path()?;
	let server_cfg = crate::config::load_server_config_from_path(&config_path)?;
	info!(path = %config_path.display(), "loaded server config (toml + env overrides)");

	init_metrics(server_cfg.server.metrics_bind.as_deref());

	let presence = PresenceRegistry::new(PresenceConfig::default());

	let health_state = HealthState::new(presence.clone());
	if let Some(bind) = server_cfg.server.health_bind.as_deref() {
		match bind.parse::<std::net::SocketAddr>() {
			Ok(addr) => {
				spawn_health_server(addr, health_state.clone());
				info!(%addr, "health server listening");
			}
			Err(e) => warn!(error = %e, %bind, "invalid health bind address (expected host:port)"),
		}
	}

	let (store, audit): (Arc<dyn EntityStore>, AuditService) = if server_cfg.persistence.enabled {
		let Some(database_url) = server_cfg.persistence.database_url.as_deref() else {
			return Err(anyhow::anyhow!("persistence enabled but no database_url configured"));
		};
		let store = SqliteStore::connect(database_url).await?;
		let audit = AuditService::connect(database_url).await?;
		info!("entity store: sqlite");
		(Arc::new(store), audit)
	} else {
		info!("entity store: in-memory (no persistence)");
		(Arc::new(InMemoryStore::new()), AuditService::disabled())
	};

	let permissions = PermissionResolver::with_overrides(&server_cfg.chat.room_capabilities);

	let conversations = ConversationService::new(store.clone(), audit.clone());
	for (room, display_name) in &server_cfg.chat.channels {
		match conversations.ensure_channel(room, display_name).await {
			Ok(channel) => info!(%room, conversation = %channel.id, "channel ready"),
			Err(e) => warn!(%room, error = %e, "failed to seed channel"),
		}
		// A room without a capability mapping fails closed for everyone.
		if permissions.capability_for(room).is_none() {
			warn!(%room, "channel room has no capability mapping; it will be inaccessible");
		}
	}

	if server_cfg.server.auth_hmac_secret.is_none() {
		warn!("no auth_hmac_secret configured; all identify attempts will be rejected");
	}

	let conn_settings = ConnectionSettings {
		push_queue_capacity: server_cfg.server.push_queue_capacity,
		identify_timeout: Duration::from_secs(server_cfg.server.identify_timeout_secs),
		auth_hmac_secret: server_cfg.server.auth_hmac_secret.clone(),
		..ConnectionSettings::default()
	};

	health_state.mark_ready();

	let listener = TcpListener::bind(bind_addr).await?;
	info!(bind = %bind_addr, "pantry_server: listening");

	let mut next_conn_id: u64 = 1;

	loop {
		let (stream, remote) = match listener.accept().await {
			Ok(accepted) => accepted,
			Err(e) => {
				warn!(error = %e, "accept failed");
				continue;
			}
		};

		let conn_id = next_conn_id;
		next_conn_id += 1;
		metrics::counter!("pantry_server_connections_total").increment(1);
		info!(conn_id, remote = %remote, "accepted connection");

		let presence = presence.clone();
		let store = store.clone();
		let conn_settings = conn_settings.clone();
		tokio::spawn(async move {
			if let Err(e) = handle_connection(conn_id, stream, presence, store, conn_settings).await {
				warn!(conn_id, error = %e, "connection handler exited with error");
			}
		});
	}
}
