#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use palaver_server::app::{AppState, build_router};
use palaver_server::config;
use palaver_server::server::connection::ConnectionSettings;
use palaver_server::server::health::{HealthState, spawn_health_server};
use palaver_server::server::store::{self, ChatStore, DataFile};
use palaver_server::util::time::unix_ms_now;
use palaver_util::endpoint::WsEndpoint;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Dev-only demo data enable flag.
const PALAVER_ENABLE_DEMO_SEED_ENV: &str = "PALAVER_ENABLE_DEMO_SEED";

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: palaver_server [--bind ws://host:port]\n\
\n\
Options:\n\
\t--bind    Bind endpoint (default: ws://127.0.0.1:8000)\n\
\t         Format: ws://host:port\n\
\t--help   Show this help\n\
"
	);
	std::process::exit(2)
}

fn parse_args() -> SocketAddr {
	let mut bind_endpoint = "ws://127.0.0.1:8000".to_string();

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

	let bind = WsEndpoint::parse(&bind_endpoint).unwrap_or_else(|e| {
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
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,palaver_server=debug".to_string());

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
				let tracer = tracer_provider.tracer("palaver_server");
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

fn demo_seed_enabled() -> bool {
	cfg!(debug_assertions)
		&& std::env::var(PALAVER_ENABLE_DEMO_SEED_ENV)
			.map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
			.unwrap_or(false)
}

fn load_store(cfg: &config::ServerConfig) -> anyhow::Result<ChatStore> {
	let data = match cfg.persistence.data_path.as_deref() {
		Some(path) => {
			let data = store::read_data_file(path)?.unwrap_or_default();
			info!(
				path = %path.display(),
				chats = data.chats.len(),
				users = data.users.len(),
				write_back = cfg.persistence.enabled,
				"loaded store data file"
			);
			data
		}
		None => {
			if cfg.persistence.enabled {
				warn!("persistence enabled but no data_path configured; running in-memory only");
			}
			DataFile::default()
		}
	};

	let data = if data.chats.is_empty() && demo_seed_enabled() {
		info!(env = PALAVER_ENABLE_DEMO_SEED_ENV, "seeding dev-only demo data (enabled by env)");
		store::demo_data(unix_ms_now())
	} else {
		data
	};

	let persist_path = cfg
		.persistence
		.enabled
		.then(|| cfg.persistence.data_path.clone())
		.flatten();

	ChatStore::from_data(data, persist_path)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();

	let bind_addr = parse_args();

	let config_path = config::default_config_path()?;
	let server_cfg = config::load_server_config_from_path(&config_path)?;
	info!(path = %config_path.display(), "loaded server config (toml + env overrides)");

	init_metrics(server_cfg.server.metrics_bind.as_deref());

	let health_state = HealthState::new();
	if let Some(bind) = server_cfg.server.health_bind.as_deref() {
		match bind.parse::<std::net::SocketAddr>() {
			Ok(addr) => {
				spawn_health_server(addr, health_state.clone());
				info!(%addr, "health server listening");
			}
			Err(e) => warn!(error = %e, %bind, "invalid health bind address (expected host:port)"),
		}
	}

	let store = Arc::new(load_store(&server_cfg)?);

	let settings = ConnectionSettings {
		max_frame_bytes: server_cfg.server.max_frame_bytes,
		outbound_queue_capacity: server_cfg.server.outbound_queue_capacity,
	};

	let app = build_router(AppState::new(store, settings));

	let listener = tokio::net::TcpListener::bind(bind_addr).await?;
	info!(bind = %bind_addr, "palaver_server: WebSocket endpoint ready");

	health_state.mark_ready();

	axum::serve(listener, app).await?;

	Ok(())
}
