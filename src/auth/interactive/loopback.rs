//! Loopback redirect listener for the authorization-code flow.
//!
//! Binds `127.0.0.1` (and `::1` on the same port when available), waits for
//! the browser to be redirected to `http://localhost:{port}/?code=...&state=...`,
//! answers with a small HTML page and hands back the code once the state
//! checks out.
//!
//! Each connection is read in its own task under [`REQUEST_READ_TIMEOUT`],
//! so an idle preconnect cannot hold up the real redirect.

use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::auth::error::AuthError;
use crate::error::GraphError;

/// Longest request head accepted from the browser.
const MAX_HEAD_BYTES: usize = 16 * 1024;

/// How long a connection may take to send its request head.
pub const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Query parameters of the redirect.
#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Parse the request target of `GET /?code=...` style lines.
    pub fn from_target(target: &str) -> Option<Self> {
        let url = url::Url::parse(&format!("http://localhost{target}")).ok()?;
        let mut params = Self::default();
        for (key, value) in url.query_pairs() {
            let value = Some(value.into_owned());
            match key.as_ref() {
                "code" => params.code = value,
                "state" => params.state = value,
                "error" => params.error = value,
                "error_description" => params.error_description = value,
                _ => {}
            }
        }
        Some(params)
    }

    /// `true` when this request carries an authorization outcome.
    fn is_redirect(&self) -> bool {
        self.code.is_some() || self.error.is_some()
    }
}

/// Check the redirect against the state we sent and extract the code.
pub fn validate_callback(params: &CallbackParams, expected_state: &str) -> Result<String, AuthError> {
    if let Some(ref error) = params.error {
        let desc = params
            .error_description
            .as_deref()
            .unwrap_or("Unknown error");
        warn!(error = %error, description = %desc, "Authorization server returned an error");
        return Err(AuthError::Callback(format!("{error}: {desc}")));
    }

    match params.state.as_deref() {
        Some(state) if state == expected_state => {}
        _ => return Err(AuthError::InvalidState),
    }

    params
        .code
        .clone()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AuthError::Callback("Missing authorization code in redirect".to_string()))
}

pub struct LoopbackListener {
    v4: TcpListener,
    v6: Option<TcpListener>,
    port: u16,
}

impl LoopbackListener {
    /// Bind the loopback port; `0` picks a free one.
    ///
    /// `127.0.0.1` is required. `::1` is bound on the same port when the
    /// host supports it, since browsers may resolve `localhost` to either.
    pub async fn bind(port: u16) -> Result<Self, GraphError> {
        let v4 = TcpListener::bind(("127.0.0.1", port)).await?;
        let port = v4.local_addr()?.port();
        let v6 = match TcpListener::bind(("::1", port)).await {
            Ok(listener) => Some(listener),
            Err(e) => {
                debug!(port, error = %e, "IPv6 loopback unavailable, listening on IPv4 only");
                None
            }
        };
        debug!(port, ipv6 = v6.is_some(), "Loopback redirect listener bound");
        Ok(Self { v4, v6, port })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn redirect_uri(&self) -> String {
        format!("http://localhost:{}", self.port)
    }

    async fn accept(&self) -> std::io::Result<(TcpStream, SocketAddr)> {
        match &self.v6 {
            Some(v6) => tokio::select! {
                accepted = self.v4.accept() => accepted,
                accepted = v6.accept() => accepted,
            },
            None => self.v4.accept().await,
        }
    }

    /// Serve requests until one carries the redirect, then return its code.
    ///
    /// Unrelated requests (e.g. `/favicon.ico`) get a 404 and are ignored.
    /// Connections that send nothing are dropped after the read timeout.
    pub async fn wait_for_code(self, expected_state: &str) -> Result<String, GraphError> {
        let (tx, mut rx) = mpsc::channel::<(TcpStream, String)>(8);
        // Dropped on return, which aborts readers still waiting on idle sockets
        let mut readers = JoinSet::new();

        loop {
            tokio::select! {
                accepted = self.accept() => {
                    let (stream, peer) = accepted?;
                    debug!(%peer, "Loopback connection accepted");
                    readers.spawn(read_connection(stream, peer, tx.clone()));
                }
                Some((mut stream, target)) = rx.recv() => {
                    let params = CallbackParams::from_target(&target).unwrap_or_default();
                    if !params.is_redirect() {
                        respond(&mut stream, "404 Not Found", "Not found").await;
                        continue;
                    }

                    return match validate_callback(&params, expected_state) {
                        Ok(code) => {
                            respond(&mut stream, "200 OK", &page("Sign-in complete", "You can close this window.")).await;
                            Ok(code)
                        }
                        Err(e) => {
                            let detail = e.to_string();
                            respond(&mut stream, "400 Bad Request", &page("Sign-in failed", &detail)).await;
                            Err(e.into())
                        }
                    };
                }
                Some(_) = readers.join_next(), if !readers.is_empty() => {}
            }
        }
    }
}

/// Read one request head and forward it with its stream.
async fn read_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    tx: mpsc::Sender<(TcpStream, String)>,
) {
    match tokio::time::timeout(REQUEST_READ_TIMEOUT, read_request_target(&mut stream)).await {
        Ok(Ok(Some(target))) => {
            let _ = tx.send((stream, target)).await;
        }
        Ok(Ok(None)) => respond(&mut stream, "400 Bad Request", "Bad request").await,
        Ok(Err(e)) => debug!(%peer, error = %e, "Failed to read loopback request"),
        Err(_) => debug!(%peer, "Loopback connection sent no request, dropping"),
    }
}

/// Read the request line and drain the headers. `None` for malformed requests.
async fn read_request_target(stream: &mut TcpStream) -> std::io::Result<Option<String>> {
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;

    let mut consumed = request_line.len();
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        consumed += n;
        if n == 0 || line == "\r\n" || line == "\n" || consumed > MAX_HEAD_BYTES {
            break;
        }
    }

    let mut parts = request_line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("GET"), Some(target)) if target.starts_with('/') => Ok(Some(target.to_string())),
        _ => Ok(None),
    }
}

async fn respond(stream: &mut TcpStream, status: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        debug!(error = %e, "Failed to write loopback response");
    }
    let _ = stream.shutdown().await;
}

fn page(title: &str, message: &str) -> String {
    format!(
        "<!DOCTYPE html><html lang=\"en\"><head><meta charset=\"UTF-8\"><title>{0}</title></head>\
         <body style=\"font-family: sans-serif; text-align: center; padding-top: 4rem\">\
         <h1>{0}</h1><p>{1}</p></body></html>",
        html_escape(title),
        html_escape(message)
    )
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}
