//! Transport module
//!
//! The wire-level boundary of the pool: open an authenticated connection,
//! run a liveness probe on it, close it. The pool engine only ever talks to
//! a database through this trait.

mod postgres;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;

pub use postgres::PgTransport;

/// Default PostgreSQL wire port
pub const DEFAULT_PORT: u16 = 5432;

/// Where and as whom to connect
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ConnectParams {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    /// Refuse to connect without TLS
    pub tls_required: bool,
}

impl ConnectParams {
    /// Parameters for `host` with the DSQL defaults
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            database: "postgres".to_string(),
            username: "admin".to_string(),
            tls_required: true,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    pub fn with_tls_required(mut self, required: bool) -> Self {
        self.tls_required = required;
        self
    }

    /// `host:port` for log and error messages
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Opens, probes and closes physical connections
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Raw connection handle
    type Connection: Send + 'static;

    /// Perform the authenticated handshake using `password`
    async fn open(
        &self,
        params: &ConnectParams,
        password: &str,
    ) -> Result<Self::Connection, TransportError>;

    /// Cheap round trip; `Ok` means the connection is usable
    async fn probe(&self, conn: &mut Self::Connection) -> Result<(), TransportError>;

    /// Close the connection, swallowing any error
    async fn close(&self, conn: Self::Connection);
}
