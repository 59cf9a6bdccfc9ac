//! Microsoft Graph session and token lifecycle.
//!
//! [`SessionManager`] turns a [`Config`] into an authenticated
//! [`GraphClient`]. Tokens are renewed on demand by a single-flight cache,
//! optionally persisted encrypted on disk, and throttled calls are retried
//! according to the server's `Retry-After` hint.

pub mod auth;
pub mod client;
pub mod config;
pub mod crypto;
pub mod error;
pub mod models;
pub mod net;
pub mod retry;
pub mod session;
pub mod telemetry;
pub mod token;

pub use crate::client::GraphClient;
pub use crate::config::{AuthMethod, Config};
pub use crate::error::{ErrorKind, GraphError};
pub use crate::models::{ConnectionDescriptor, ConnectionType};
pub use crate::retry::{RetryError, RetryPolicy};
pub use crate::session::{Session, SessionManager};
pub use crate::token::BearerToken;
