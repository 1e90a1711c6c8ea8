//! Backend client construction.
//!
//! Resources are rebuilt from plans, and a plan only names a region or
//! a Nomad address. `BackendFactory` turns those into API clients so the
//! policy loader never touches credentials directly.

use std::sync::Arc;
use std::time::Duration;

use aws_config::default_provider::credentials::DefaultCredentialsChain;
use aws_sdk_autoscaling::config::{Credentials, SharedCredentialsProvider};
use tracing::{info, warn};

use nopas_core::NopasConfig;

use crate::ec2::{AutoScalingApi, AwsAutoScaling};
use crate::error::{ResourceError, ResourceResult};
use crate::nomad::{NomadApi, NomadHttpClient};
use crate::secret::{SecretStore, VaultClient};

pub const DEFAULT_VAULT_TOKEN_ENV: &str = "VAULT_TOKEN";

pub trait BackendFactory: Send + Sync {
    fn autoscaling(&self, region: &str) -> ResourceResult<Arc<dyn AutoScalingApi>>;

    fn nomad(&self, address: &str) -> ResourceResult<Arc<dyn NomadApi>>;

    fn secrets(&self) -> ResourceResult<Arc<dyn SecretStore>>;

    /// Upper bound applied to every backend call.
    fn call_timeout(&self) -> Duration;
}

/// Real AWS, Nomad and Vault clients.
pub struct LiveBackends {
    credentials: SharedCredentialsProvider,
    vault: Option<Arc<VaultClient>>,
    call_timeout: Duration,
}

impl LiveBackends {
    pub async fn connect(config: &NopasConfig) -> ResourceResult<Self> {
        let call_timeout = config.call_timeout();
        let credentials = aws_credentials(config).await?;

        let vault = match &config.vault {
            Some(vault) => {
                let env = vault.token_env.as_deref().unwrap_or(DEFAULT_VAULT_TOKEN_ENV);
                let token = std::env::var(env).map_err(|_| ResourceError::Credential {
                    path: env.to_string(),
                    reason: "vault token environment variable is not set".to_string(),
                })?;
                info!(address = %vault.address, "vault configured");
                Some(Arc::new(VaultClient::new(&vault.address, token, call_timeout)?))
            }
            None => {
                warn!("no [vault] section; Nomad resources cannot be scaled");
                None
            }
        };

        Ok(Self {
            credentials,
            vault,
            call_timeout,
        })
    }
}

async fn aws_credentials(config: &NopasConfig) -> ResourceResult<SharedCredentialsProvider> {
    let keys = config
        .aws
        .as_ref()
        .and_then(|aws| Some((aws.access_key_env.as_deref()?, aws.secret_key_env.as_deref()?)));

    match keys {
        Some((id_env, secret_env)) => {
            let read = |env: &str| {
                std::env::var(env).map_err(|_| ResourceError::Credential {
                    path: env.to_string(),
                    reason: "AWS key environment variable is not set".to_string(),
                })
            };
            let credentials = Credentials::new(read(id_env)?, read(secret_env)?, None, None, "nopas-static");
            info!(access_key_env = %id_env, "using static AWS credentials");
            Ok(SharedCredentialsProvider::new(credentials))
        }
        None => {
            info!("using default AWS credential chain");
            let chain = DefaultCredentialsChain::builder().build().await;
            Ok(SharedCredentialsProvider::new(chain))
        }
    }
}

impl BackendFactory for LiveBackends {
    fn autoscaling(&self, region: &str) -> ResourceResult<Arc<dyn AutoScalingApi>> {
        Ok(Arc::new(AwsAutoScaling::new(region, self.credentials.clone())))
    }

    fn nomad(&self, address: &str) -> ResourceResult<Arc<dyn NomadApi>> {
        Ok(Arc::new(NomadHttpClient::new(address, self.call_timeout)?))
    }

    fn secrets(&self) -> ResourceResult<Arc<dyn SecretStore>> {
        match &self.vault {
            Some(vault) => Ok(vault.clone()),
            None => Err(ResourceError::Credential {
                path: "vault".to_string(),
                reason: "no [vault] section configured".to_string(),
            }),
        }
    }

    fn call_timeout(&self) -> Duration {
        self.call_timeout
    }
}
