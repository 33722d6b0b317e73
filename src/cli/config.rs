//! Merging command-line flags into the service configuration

use crate::cli::main_impl::{ModelArgs, ServeArgs};
use crate::{
    config::{RemovalConfig, ServiceConfig},
    models::ModelSource,
};
use anyhow::{Context, Result};

/// Applies CLI flags on top of file and environment configuration
pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Load the layered service configuration and apply `serve` flags
    pub(crate) fn service_config(args: &ServeArgs) -> Result<ServiceConfig> {
        let mut config = ServiceConfig::load(args.config.as_deref())
            .context("Failed to load service configuration")?;

        if let Some(host) = &args.host {
            config.host.clone_from(host);
        }
        if let Some(port) = args.port {
            config.port = port;
        }
        if let Some(workers) = args.workers {
            config.workers = workers;
        }
        if let Some(media_dir) = &args.media_dir {
            config.background_dir = media_dir.join("backgrounds");
            config.media_dir.clone_from(media_dir);
        }
        if let Some(base_url) = &args.public_base_url {
            config.public_base_url.clone_from(base_url);
        }
        Self::apply_model_args(&mut config.removal, &args.model);

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    /// Removal settings for the offline commands
    pub(crate) fn removal_config(args: &ModelArgs) -> Result<RemovalConfig> {
        let mut removal = ServiceConfig::load(None)
            .context("Failed to load configuration")?
            .removal;
        Self::apply_model_args(&mut removal, args);
        removal.validate().context("Invalid removal settings")?;
        Ok(removal)
    }

    fn apply_model_args(removal: &mut RemovalConfig, args: &ModelArgs) {
        if let Some(model) = &args.model {
            removal.model = ModelSource::parse(model);
        }
        if let Some(sha) = &args.model_sha256 {
            removal.model_sha256 = Some(sha.clone());
        }
        if let Some(backend) = args.backend {
            removal.backend = backend.into();
        }
        if let Some(provider) = args.execution_provider {
            removal.execution_provider = provider.into();
        }
        if let Some(passes) = args.passes {
            removal.passes = passes;
        }
        if let Some(threads) = args.threads {
            removal.intra_threads = threads;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::main_impl::{CliBackend, CliProvider};
    use crate::config::{BackendType, ExecutionProvider};

    #[test]
    fn test_model_flags_override_defaults() {
        let mut removal = RemovalConfig::default();
        let args = ModelArgs {
            model: Some("/models/rmbg.onnx".to_string()),
            model_sha256: None,
            backend: Some(CliBackend::Tract),
            execution_provider: Some(CliProvider::Cpu),
            passes: Some(2),
            threads: Some(4),
        };
        CliConfigBuilder::apply_model_args(&mut removal, &args);

        assert!(matches!(removal.model, ModelSource::Path(_)));
        assert_eq!(removal.backend, BackendType::Tract);
        assert_eq!(removal.execution_provider, ExecutionProvider::Cpu);
        assert_eq!(removal.passes, 2);
        assert_eq!(removal.intra_threads, 4);
    }

    #[test]
    fn test_absent_flags_keep_values() {
        let mut removal = RemovalConfig {
            passes: 3,
            ..RemovalConfig::default()
        };
        let args = ModelArgs {
            model: None,
            model_sha256: None,
            backend: None,
            execution_provider: None,
            passes: None,
            threads: None,
        };
        CliConfigBuilder::apply_model_args(&mut removal, &args);
        assert_eq!(removal, RemovalConfig {
            passes: 3,
            ..RemovalConfig::default()
        });
    }
}
