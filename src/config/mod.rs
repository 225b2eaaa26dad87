//! Configuration management module
//!
//! This module handles loading and validating application configuration
//! from environment variables and .env files.

pub mod aws;
pub mod settings;

pub use aws::{build_aws_config, create_token_provider, AwsConfigBuilder};
pub use settings::{DsqlSettings, Environment, PoolSettings, Settings};
