//! Command-line and environment configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use kube::config::{InferConfigError, KubeConfigOptions, Kubeconfig, KubeconfigError};
use kube::{Client, Config};
use thiserror::Error;

use crate::controller::context::ReconcilerSettings;

/// Errors building the Kubernetes client from configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read kubeconfig: {0}")]
    Kubeconfig(#[from] KubeconfigError),

    #[error("failed to infer cluster config: {0}")]
    Infer(#[from] InferConfigError),

    #[error("invalid API server address: {0}")]
    InvalidMaster(#[from] http::uri::InvalidUri),

    #[error("failed to create client: {0}")]
    Client(#[from] kube::Error),
}

/// Log output format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "tidb-operator")]
#[command(about = "Converges TidbCluster resources into pods and services", long_about = None)]
#[command(version)]
pub struct OperatorConfig {
    /// Path to a kubeconfig file. In-cluster or default config when omitted.
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// API server address, overriding the one from the kubeconfig.
    #[arg(long, env = "TIDB_OPERATOR_MASTER")]
    pub master: Option<String>,

    /// Number of clusters reconciled concurrently.
    #[arg(long, env = "TIDB_OPERATOR_WORKERS", default_value_t = 2)]
    pub workers: u16,

    /// Only watch this namespace. Cluster-wide when omitted.
    #[arg(long, env = "TIDB_OPERATOR_NAMESPACE")]
    pub namespace: Option<String>,

    /// Seconds between passes of a steady cluster.
    #[arg(long, env = "TIDB_OPERATOR_RESYNC_INTERVAL", default_value_t = 30)]
    pub resync_interval_secs: u64,

    /// Seconds before an unobserved create or delete stops gating a cluster.
    #[arg(long, env = "TIDB_OPERATOR_EXPECTATION_TTL", default_value_t = 300)]
    pub expectation_ttl_secs: u64,

    /// Port of the health and metrics server.
    #[arg(long, env = "TIDB_OPERATOR_HEALTH_PORT", default_value_t = 8080)]
    pub health_port: u16,

    #[arg(long, env = "TIDB_OPERATOR_LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,
}

impl OperatorConfig {
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    pub fn expectation_ttl(&self) -> Duration {
        Duration::from_secs(self.expectation_ttl_secs)
    }

    pub fn reconciler_settings(&self) -> ReconcilerSettings {
        ReconcilerSettings {
            resync_interval: self.resync_interval(),
            ..ReconcilerSettings::default()
        }
    }

    /// Build a client from `--kubeconfig`/`--master`, falling back to the
    /// in-cluster or inferred configuration.
    pub async fn kube_client(&self) -> Result<Client, ConfigError> {
        let mut config = match &self.kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path)?;
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?
            }
            None => Config::infer().await?,
        };
        if let Some(master) = &self.master {
            config.cluster_url = master.parse::<http::Uri>()?;
        }
        Ok(Client::try_from(config)?)
    }
}
