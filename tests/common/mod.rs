//! Shared helpers for the wiremock integration tests.

#![allow(dead_code)]

use graph_gate::{AuthMethod, Config};
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::{Value, json};
use wiremock::MockServer;

pub const TENANT: &str = "contoso";
pub const CLIENT_ID: &str = "11111111-2222-3333-4444-555555555555";
pub const TOKEN_PATH: &str = "/contoso/oauth2/v2.0/token";

/// HS256 JWT whose `exp` is `secs` from now.
pub fn jwt_expiring_in(secs: i64) -> String {
    let exp = chrono::Utc::now().timestamp() + secs;
    encode(
        &Header::default(),
        &json!({ "exp": exp, "aud": "https://graph.microsoft.com" }),
        &EncodingKey::from_secret(b"integration"),
    )
    .unwrap()
}

/// Token endpoint success body.
pub fn token_response(access_token: &str, refresh_token: Option<&str>) -> Value {
    let mut body = json!({
        "token_type": "Bearer",
        "scope": "https://graph.microsoft.com/.default",
        "expires_in": 3599,
        "access_token": access_token,
    });
    if let Some(refresh) = refresh_token {
        body["refresh_token"] = json!(refresh);
    }
    body
}

/// Config pointing both the authority and the Graph API at `server`.
pub fn config_for(server: &MockServer, method: AuthMethod) -> Config {
    let mut config = Config::default();
    config.auth.method = method;
    config.auth.instance = format!("{}/{{tenant}}", server.uri());
    config.auth.api_url = server.uri();
    config.auth.tenant = TENANT.into();
    config.auth.client_id = CLIENT_ID.into();
    config
}
