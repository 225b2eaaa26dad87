//! Authentication module
//!
//! Short-lived credentials for new physical connections. The pool never
//! caches a token: every connection attempt mints its own.

mod credential;
mod dsql;

pub use credential::{Credential, StaticTokenProvider, TokenProvider};
pub use dsql::{DsqlTokenProvider, ADMIN_USER};
