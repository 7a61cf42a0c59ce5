#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, anyhow};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use pantry_domain::{AuthUser, PlatformRole, UserId};
use serde::Deserialize;
use sha2::Sha256;

/// Claims carried in a `v1.<payload>.<sig>` access token.
///
/// The authentication collaborator mints these; this server only verifies.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthClaims {
	pub sub: String,
	pub exp: u64,

	#[serde(default)]
	pub role: Option<String>,
	#[serde(default)]
	pub capabilities: Vec<String>,

	#[serde(default)]
	pub display_name: Option<String>,
	#[serde(default)]
	pub first_name: Option<String>,
	#[serde(default)]
	pub last_name: Option<String>,
	#[serde(default)]
	pub email: Option<String>,
}

pub fn verify_hmac_token(token: &str, secret: &str) -> anyhow::Result<AuthClaims> {
	let parts = token.split('.').collect::<Vec<_>>();
	if parts.len() != 3 || parts[0] != "v1" {
		return Err(anyhow!("invalid token format"));
	}

	let payload_b64 = parts[1];
	let sig_b64 = parts[2];

	let payload = URL_SAFE_NO_PAD.decode(payload_b64).context("decode token payload")?;
	let expected_sig = sign(payload_b64.as_bytes(), secret.as_bytes());
	let provided_sig = URL_SAFE_NO_PAD.decode(sig_b64).context("decode token signature")?;

	if !constant_time_eq(&expected_sig, &provided_sig) {
		return Err(anyhow!("invalid token signature"));
	}

	let claims: AuthClaims = serde_json::from_slice(&payload).context("parse token claims")?;
	let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
	if claims.exp <= now {
		return Err(anyhow!("token expired"));
	}

	Ok(claims)
}

/// Resolve verified claims into the trusted request user.
pub fn auth_user_from_claims(claims: &AuthClaims) -> anyhow::Result<AuthUser> {
	let user_id = UserId::new(claims.sub.clone()).context("token sub")?;
	let role = match claims.role.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
		Some(role) => role.parse::<PlatformRole>().context("token role")?,
		None => PlatformRole::Volunteer,
	};

	Ok(AuthUser {
		user_id,
		role,
		capabilities: claims.capabilities.iter().cloned().collect::<BTreeSet<_>>(),
		display_name: claims.display_name.clone().filter(|s| !s.trim().is_empty()),
		first_name: claims.first_name.clone().filter(|s| !s.trim().is_empty()),
		last_name: claims.last_name.clone().filter(|s| !s.trim().is_empty()),
		email: claims.email.clone().filter(|s| !s.trim().is_empty()),
	})
}

fn sign(payload_b64: &[u8], secret: &[u8]) -> Vec<u8> {
	let mut mac = Hmac::<Sha256>::new_from_slice(secret).expect("hmac key");
	mac.update(payload_b64);
	mac.finalize().into_bytes().to_vec()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
	if a.len() != b.len() {
		return false;
	}

	let mut diff = 0u8;
	for (x, y) in a.iter().zip(b.iter()) {
		diff |= x ^ y;
	}

	diff == 0
}

#[cfg(test)]
mod tests {
	use super::*;

	fn mint(payload: &serde_json::Value, secret: &str) -> String {
		let payload_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload).unwrap());
		let sig = sign(payload_b64.as_bytes(), secret.as_bytes());
		let sig_b64 = URL_SAFE_NO_PAD.encode(sig);
		format!("v1.{payload_b64}.{sig_b64}")
	}

	fn far_future() -> u64 {
		SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() + 3_600
	}

	#[test]
	fn verifies_a_minted_token() {
		let token = mint(
			&serde_json::json!({
				"sub": "user-7",
				"exp": far_future(),
				"role": "moderator",
				"capabilities": ["chat_hosts", "chat_moderate"],
				"display_name": "Ada Park",
			}),
			"s3cret",
		);

		let claims = verify_hmac_token(&token, "s3cret").expect("valid token");
		assert_eq!(claims.sub, "user-7");

		let user = auth_user_from_claims(&claims).expect("auth user");
		assert_eq!(user.role, PlatformRole::Moderator);
		assert!(user.has_capability("chat_hosts"));
		assert_eq!(user.resolved_display_name(), "Ada Park");
	}

	#[test]
	fn role_defaults_to_volunteer() {
		let token = mint(&serde_json::json!({ "sub": "user-8", "exp": far_future() }), "s3cret");
		let claims = verify_hmac_token(&token, "s3cret").expect("valid token");
		let user = auth_user_from_claims(&claims).expect("auth user");
		assert_eq!(user.role, PlatformRole::Volunteer);
		assert!(user.capabilities.is_empty());
	}

	#[test]
	fn rejects_wrong_secret() {
		let token = mint(&serde_json::json!({ "sub": "u", "exp": far_future() }), "s3cret");
		assert!(verify_hmac_token(&token, "other").is_err());
	}

	#[test]
	fn rejects_tampered_payload() {
		let token = mint(&serde_json::json!({ "sub": "u", "exp": far_future() }), "s3cret");
		let parts: Vec<&str> = token.split('.').collect();
		let forged_payload = URL_SAFE_NO_PAD.encode(
			serde_json::to_vec(&serde_json::json!({ "sub": "admin", "exp": far_future(), "role": "admin" })).unwrap(),
		);
		let forged = format!("v1.{forged_payload}.{}", parts[2]);
		assert!(verify_hmac_token(&forged, "s3cret").is_err());
	}

	#[test]
	fn rejects_expired_tokens() {
		let token = mint(&serde_json::json!({ "sub": "u", "exp": 1 }), "s3cret");
		let err = verify_hmac_token(&token, "s3cret").unwrap_err();
		assert!(err.to_string().contains("expired"));
	}

	#[test]
	fn rejects_malformed_tokens() {
		assert!(verify_hmac_token("v2.a.b", "s").is_err());
		assert!(verify_hmac_token("v1.onlytwo", "s").is_err());
		assert!(verify_hmac_token("", "s").is_err());
	}

	#[test]
	fn rejects_empty_sub() {
		let token = mint(&serde_json::json!({ "sub": "  ", "exp": far_future() }), "s3cret");
		let claims = verify_hmac_token(&token, "s3cret").expect("signature ok");
		assert!(auth_user_from_claims(&claims).is_err());
	}
}
