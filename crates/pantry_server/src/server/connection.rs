#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use bytes::BytesMut;
use pantry_chat::{ConnectionId, PresenceRegistry};
use pantry_domain::AuthUser;
use pantry_protocol::{ClientFrame, DEFAULT_MAX_FRAME_SIZE, ServerFrame, encode_frame, try_decode_frame_from_buffer};
use pantry_store::{EntityStore, UserRecord};
use pantry_util::secret::SecretString;
use pantry_util::time::unix_ms_now;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::server::auth::{auth_user_from_claims, verify_hmac_token};

/// Per-connection server settings.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
	pub max_frame_bytes: usize,

	/// Bounded push queue; full queues drop frames instead of blocking.
	pub push_queue_capacity: usize,

	/// How long a fresh connection may wait before identifying.
	pub identify_timeout: Duration,

	pub auth_hmac_secret: Option<SecretString>,
}

impl Default for ConnectionSettings {
	fn default() -> Self {
		Self {
			max_frame_bytes: DEFAULT_MAX_FRAME_SIZE,
			push_queue_capacity: 256,
			identify_timeout: Duration::from_secs(10),
			auth_hmac_secret: None,
		}
	}
}

/// Drive one live connection: identify, register presence, pump pushes.
pub async fn handle_connection(
	conn_id: ConnectionId,
	stream: TcpStream,
	presence: PresenceRegistry,
	store: Arc<dyn EntityStore>,
	settings: ConnectionSettings,
) -> anyhow::Result<()> {
	struct ConnectionGaugeGuard;
	impl Drop for ConnectionGaugeGuard {
		fn drop(&mut self) {
			metrics::gauge!("pantry_server_active_connections").decrement(1.0);
		}
	}

	metrics::gauge!("pantry_server_active_connections").increment(1.0);
	let _conn_guard = ConnectionGaugeGuard;

	let (mut read_half, mut write_half) = stream.into_split();

	let max_frame_bytes = settings.max_frame_bytes;
	let (ctrl_tx, mut ctrl_rx) = mpsc::unbounded_channel::<ClientFrame>();
	let reader_task = tokio::spawn(async move {
		let mut buf = BytesMut::with_capacity(16 * 1024);
		let mut tmp = [0u8; 8192];

		loop {
			let n = match read_half.read(&mut tmp).await {
				Ok(0) => return Ok::<(), anyhow::Error>(()),
				Ok(n) => n,
				Err(e) => return Err(anyhow!(e).context("connection read failed")),
			};

			metrics::counter!("pantry_server_bytes_in_total").increment(n as u64);
			buf.extend_from_slice(&tmp[..n]);

			loop {
				match try_decode_frame_from_buffer::<ClientFrame>(&mut buf, max_frame_bytes) {
					Ok(Some(frame)) => {
						metrics::counter!("pantry_server_frames_in_total").increment(1);
						if ctrl_tx.send(frame).is_err() {
							return Ok(());
						}
					}
					Ok(None) => break,
					Err(e) => {
						metrics::counter!("pantry_server_decode_errors_total").increment(1);
						return Err(anyhow!(e).context("failed to decode client frame"));
					}
				}
			}
		}
	});

	let result = run_identified(conn_id, &mut ctrl_rx, &mut write_half, &presence, &store, &settings).await;

	presence.unregister(conn_id).await;
	reader_task.abort();
	result
}

async fn run_identified(
	conn_id: ConnectionId,
	ctrl_rx: &mut mpsc::UnboundedReceiver<ClientFrame>,
	write_half: &mut OwnedWriteHalf,
	presence: &PresenceRegistry,
	store: &Arc<dyn EntityStore>,
	settings: &ConnectionSettings,
) -> anyhow::Result<()> {
	let token = match wait_for_identify(ctrl_rx, settings.identify_timeout).await {
		Ok(token) => token,
		Err(e) => {
			debug!(conn_id, error = %e, "connection closed before identify");
			return Ok(());
		}
	};

	let user = match authorize(&token, settings.auth_hmac_secret.as_ref()) {
		Ok(user) => user,
		Err(e) => {
			warn!(conn_id, error = %e, "identify rejected");
			metrics::counter!("pantry_server_identify_rejected_total").increment(1);
			write_frame(
				write_half,
				&ServerFrame::Error {
					code: "unauthorized".to_string(),
					message: "invalid access token".to_string(),
				},
				settings.max_frame_bytes,
			)
			.await
			.ok();
			return Ok(());
		}
	};

	// Mirror the verified user so channel fan-out audiences stay current.
	if let Err(e) = store.upsert_user(&user_record_from(&user)).await {
		warn!(conn_id, user = %user.user_id, error = %e, "failed to mirror user record");
	}

	write_frame(
		write_half,
		&ServerFrame::Identified {
			user_id: user.user_id.to_string(),
			server_time_unix_ms: unix_ms_now(),
		},
		settings.max_frame_bytes,
	)
	.await?;

	let (push_tx, mut push_rx) = mpsc::channel::<ServerFrame>(settings.push_queue_capacity);
	presence.register(user.user_id.clone(), conn_id, push_tx).await;

	info!(conn_id, user = %user.user_id, "connection identified");
	metrics::counter!("pantry_server_identified_total").increment(1);

	loop {
		tokio::select! {
			frame = push_rx.recv() => {
				let Some(frame) = frame else {
					return Ok(());
				};
				write_frame(write_half, &frame, settings.max_frame_bytes).await?;
			}
			ctrl = ctrl_rx.recv() => {
				match ctrl {
					Some(ClientFrame::Identify { .. }) => {
						debug!(conn_id, "duplicate identify ignored");
					}
					// Peer closed the connection or the reader hit an error.
					None => return Ok(()),
				}
			}
		}
	}
}

async fn wait_for_identify(
	ctrl_rx: &mut mpsc::UnboundedReceiver<ClientFrame>,
	timeout: Duration,
) -> anyhow::Result<String> {
	match tokio::time::timeout(timeout, ctrl_rx.recv()).await {
		Ok(Some(ClientFrame::Identify { token })) => Ok(token),
		Ok(None) => Err(anyhow!("connection closed before identify")),
		Err(_) => Err(anyhow!("timed out waiting for identify")),
	}
}

fn authorize(token: &str, secret: Option<&SecretString>) -> anyhow::Result<AuthUser> {
	let Some(secret) = secret else {
		return Err(anyhow!("no auth_hmac_secret configured; refusing identify"));
	};

	let token = token.trim();
	if token.is_empty() {
		return Err(anyhow!("empty access token"));
	}

	let claims = verify_hmac_token(token, secret.expose())?;
	auth_user_from_claims(&claims)
}

fn user_record_from(user: &AuthUser) -> UserRecord {
	UserRecord {
		id: user.user_id.clone(),
		display_name: user.display_name.clone(),
		first_name: user.first_name.clone(),
		last_name: user.last_name.clone(),
		email: user.email.clone(),
		role: user.role,
		capabilities: user.capabilities.iter().cloned().collect(),
	}
}

async fn write_frame(write_half: &mut OwnedWriteHalf, frame: &ServerFrame, max_frame_bytes: usize) -> anyhow::Result<()> {
	let bytes = encode_frame(frame, max_frame_bytes).context("encode server frame")?;
	write_half.write_all(&bytes).await.context("write server frame")?;
	metrics::counter!("pantry_server_frames_out_total").increment(1);
	Ok(())
}
