//! AWS SDK configuration
//!
//! Builds the shared SDK configuration (region plus the default credentials
//! chain) and the DSQL token provider that signs with it.

use aws_config::{meta::region::RegionProviderChain, BehaviorVersion, Region, SdkConfig};

use crate::auth::DsqlTokenProvider;
use crate::config::Settings;

/// AWS configuration builder
///
/// Creates AWS SDK configuration with support for:
/// - Custom regions
/// - Credential providers (environment, instance profile, etc.)
pub struct AwsConfigBuilder<'a> {
    settings: &'a Settings,
}

impl<'a> AwsConfigBuilder<'a> {
    /// Create a new AWS configuration builder
    pub fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    /// Build the base AWS SDK configuration
    pub async fn build_sdk_config(&self) -> SdkConfig {
        let region_provider =
            RegionProviderChain::first_try(Region::new(self.settings.aws_region.clone()))
                .or_default_provider();

        aws_config::defaults(BehaviorVersion::latest())
            .region(region_provider)
            .load()
            .await
    }

    /// Create a token provider for the configured cluster endpoint and role
    pub async fn build_token_provider(&self) -> DsqlTokenProvider {
        let sdk_config = self.build_sdk_config().await;
        let endpoint = self.settings.endpoint();

        tracing::info!(
            cluster_id = %self.settings.dsql.cluster_id,
            endpoint = %endpoint,
            username = %self.settings.dsql.username,
            "Configured DSQL token provider"
        );

        DsqlTokenProvider::new(sdk_config, endpoint).for_user(&self.settings.dsql.username)
    }
}

/// Build AWS SDK config from settings (convenience function)
pub async fn build_aws_config(settings: &Settings) -> SdkConfig {
    AwsConfigBuilder::new(settings).build_sdk_config().await
}

/// Create a DSQL token provider from settings (convenience function)
pub async fn create_token_provider(settings: &Settings) -> DsqlTokenProvider {
    AwsConfigBuilder::new(settings).build_token_provider().await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
        let mut settings = Settings::default();
        settings.dsql.cluster_id = "abc123".to_string();
        settings
    }

    #[tokio::test]
    async fn test_build_sdk_config() {
        let config = build_aws_config(&settings()).await;

        assert!(config.region().is_some());
        assert_eq!(config.region().unwrap().as_ref(), "us-east-1");
    }

    #[tokio::test]
    async fn test_token_provider_targets_endpoint() {
        let provider = create_token_provider(&settings()).await;
        assert_eq!(provider.hostname(), "abc123.dsql.us-east-1.on.aws");
        assert!(provider.is_admin());
    }

    #[tokio::test]
    async fn test_token_provider_non_admin_role() {
        let mut settings = settings();
        settings.dsql.username = "app_user".to_string();

        let provider = create_token_provider(&settings).await;
        assert!(!provider.is_admin());
    }
}
