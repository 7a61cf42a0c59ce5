#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use pantry_chat::PresenceRegistry;
use tokio::net::TcpListener;
use tracing::warn;

/// Shared state behind the health/readiness endpoint.
///
/// Readiness flips once at startup, after channel seeding and store
/// construction; there is no un-ready transition.
#[derive(Clone)]
pub struct HealthState {
	ready: Arc<AtomicBool>,
	presence: PresenceRegistry,
	started_at: Instant,
}

impl HealthState {
	pub fn new(presence: PresenceRegistry) -> Self {
		Self {
			ready: Arc::new(AtomicBool::new(false)),
			presence,
			started_at: Instant::now(),
		}
	}

	pub fn mark_ready(&self) {
		self.ready.store(true, Ordering::Relaxed);
	}

	pub fn is_ready(&self) -> bool {
		self.ready.load(Ordering::Relaxed)
	}
}

pub fn spawn_health_server(bind: SocketAddr, state: HealthState) {
	tokio::spawn(async move {
		if let Err(err) = serve(bind, state).await {
			warn!(error = %err, "health server stopped");
		}
	});
}

async fn serve(bind: SocketAddr, state: HealthState) -> anyhow::Result<()> {
	let listener = TcpListener::bind(bind).await?;
	loop {
		let (stream, _addr) = listener.accept().await?;
		let state = state.clone();
		tokio::spawn(async move {
			let service = service_fn(move |req| route(req, state.clone()));
			if let Err(err) = http1::Builder::new().serve_connection(TokioIo::new(stream), service).await {
				warn!(error = %err, "health connection error");
			}
		});
	}
}

async fn route(req: Request<Incoming>, state: HealthState) -> Result<Response<Full<Bytes>>, hyper::Error> {
	let response = match (req.method(), req.uri().path()) {
		(&Method::GET, "/healthz") => plain(StatusCode::OK, "ok"),
		(&Method::GET, "/readyz") => {
			if state.is_ready() {
				plain(StatusCode::OK, "ready")
			} else {
				plain(StatusCode::SERVICE_UNAVAILABLE, "not-ready")
			}
		}
		(&Method::GET, "/statusz") => statusz(&state).await,
		(&Method::GET, _) => plain(StatusCode::NOT_FOUND, ""),
		_ => plain(StatusCode::METHOD_NOT_ALLOWED, ""),
	};
	Ok(response)
}

/// Operator-facing snapshot: readiness, uptime, and presence counts.
async fn statusz(state: &HealthState) -> Response<Full<Bytes>> {
	let body = serde_json::json!({
		"ready": state.is_ready(),
		"uptime_secs": state.started_at.elapsed().as_secs(),
		"connected_users": state.presence.connected_user_count().await,
		"live_connections": state.presence.connection_count().await,
	});

	let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
	response
		.headers_mut()
		.insert(hyper::header::CONTENT_TYPE, hyper::header::HeaderValue::from_static("application/json"));
	response
}

fn plain(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
	let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
	*response.status_mut() = status;
	response
}
