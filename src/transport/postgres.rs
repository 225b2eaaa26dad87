//! PostgreSQL wire transport
//!
//! DSQL speaks the PostgreSQL protocol and only accepts TLS connections, so
//! the auth token is passed as the password over a `sslmode=require` link.

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgSslMode};
use sqlx::Connection;
use std::io::ErrorKind;

use super::{ConnectParams, Transport};
use crate::error::TransportError;

/// Transport backed by a single `sqlx` PostgreSQL connection
#[derive(Debug, Clone, Default)]
pub struct PgTransport {
    /// Application name reported to the server
    application_name: Option<String>,
}

impl PgTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the `application_name` startup parameter
    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }

    /// Build the driver options for one connection attempt
    pub fn connect_options(&self, params: &ConnectParams, password: &str) -> PgConnectOptions {
        let ssl_mode = if params.tls_required {
            PgSslMode::Require
        } else {
            PgSslMode::Prefer
        };

        let mut options = PgConnectOptions::new()
            .host(&params.host)
            .port(params.port)
            .database(&params.database)
            .username(&params.username)
            .password(password)
            .ssl_mode(ssl_mode);

        if let Some(name) = &self.application_name {
            options = options.application_name(name);
        }

        options
    }
}

#[async_trait]
impl Transport for PgTransport {
    type Connection = PgConnection;

    async fn open(
        &self,
        params: &ConnectParams,
        password: &str,
    ) -> Result<PgConnection, TransportError> {
        let options = self.connect_options(params, password);
        PgConnection::connect_with(&options)
            .await
            .map_err(|e| map_open_error(&e))
    }

    async fn probe(&self, conn: &mut PgConnection) -> Result<(), TransportError> {
        conn.ping().await.map_err(|e| map_probe_error(&e))
    }

    async fn close(&self, conn: PgConnection) {
        if let Err(e) = conn.close().await {
            tracing::debug!(error = %e, "Error while closing connection");
        }
    }
}

// ============================================================================
// Error Mapping
// ============================================================================

fn map_open_error(err: &sqlx::Error) -> TransportError {
    match err {
        sqlx::Error::Tls(e) => TransportError::Handshake(e.to_string()),
        // Authentication failures arrive as server errors during startup
        sqlx::Error::Database(e) => TransportError::Handshake(e.to_string()),
        sqlx::Error::Protocol(msg) => TransportError::Handshake(msg.clone()),
        sqlx::Error::Io(e) => TransportError::Io(e.to_string()),
        other => TransportError::Other(other.to_string()),
    }
}

fn map_probe_error(err: &sqlx::Error) -> TransportError {
    match err {
        sqlx::Error::Io(e)
            if matches!(
                e.kind(),
                ErrorKind::BrokenPipe
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::UnexpectedEof
                    | ErrorKind::NotConnected
            ) =>
        {
            TransportError::Closed
        }
        sqlx::Error::Io(e) => TransportError::Io(e.to_string()),
        sqlx::Error::WorkerCrashed | sqlx::Error::PoolClosed => TransportError::Closed,
        other => TransportError::Other(other.to_string()),
    }
}
