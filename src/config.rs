use crate::rpc::DEFAULT_RECEIPT_POLL_INTERVAL;
use alloy_primitives::{
    Address,
    address,
};
use chrono::{
    DateTime,
    Utc,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fmt,
    fs,
    path::{
        Path,
        PathBuf,
    },
    time::Duration,
};

pub const DEFAULT_DEVNET_RPC_URL: &str = "https://devnet.uminetwork.com";
pub const DEFAULT_LOCAL_RPC_URL: &str = "http://localhost:8545/";
pub const UMI_DEVNET_CHAIN_ID: u64 = 42069;
pub const DEFAULT_CONTRACT_ADDRESS: Address =
    address!("4e1403ac9af1d0b19af331e08cdc0ee28eeddbb2");
/// Wait between a confirmed start and the first authoritative read.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(1);

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NetworkTarget {
    Devnet { url: String },
    LocalNode { url: String },
}

impl NetworkTarget {
    pub fn devnet(url: Option<String>) -> Self {
        NetworkTarget::Devnet {
            url: url.unwrap_or_else(|| DEFAULT_DEVNET_RPC_URL.to_string()),
        }
    }

    pub fn local(url: Option<String>) -> Self {
        NetworkTarget::LocalNode {
            url: url.unwrap_or_else(|| DEFAULT_LOCAL_RPC_URL.to_string()),
        }
    }

    pub fn url(&self) -> &str {
        match self {
            NetworkTarget::Devnet { url } | NetworkTarget::LocalNode { url } => url,
        }
    }

    /// Chain id the target is known to run. Local nodes may run anything.
    pub fn chain_id(&self) -> Option<u64> {
        match self {
            NetworkTarget::Devnet { .. } => Some(UMI_DEVNET_CHAIN_ID),
            NetworkTarget::LocalNode { .. } => None,
        }
    }

    pub fn accepts_chain_id(&self, chain_id: u64) -> bool {
        self.chain_id().is_none_or(|expected| expected == chain_id)
    }
}

impl fmt::Display for NetworkTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkTarget::Devnet { url } => write!(f, "Umi Devnet ({url})"),
            NetworkTarget::LocalNode { url } => write!(f, "Local ({url})"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub network: NetworkTarget,
    pub contract: Address,
    pub receipt_poll_interval: Duration,
    pub settle_delay: Duration,
    pub log_dir: Option<PathBuf>,
}

impl AppConfig {
    pub fn new(network: NetworkTarget) -> Self {
        Self {
            network,
            contract: DEFAULT_CONTRACT_ADDRESS,
            receipt_poll_interval: DEFAULT_RECEIPT_POLL_INTERVAL,
            settle_delay: DEFAULT_SETTLE_DELAY,
            log_dir: None,
        }
    }

    /// Takes the contract address from a deployment record, warning when the
    /// record was made against a different node.
    pub fn with_deployment(mut self, record: &DeploymentRecord) -> Self {
        if record.network_url.trim_end_matches('/')
            != self.network.url().trim_end_matches('/')
        {
            tracing::warn!(
                record_url = %record.network_url,
                network_url = %self.network.url(),
                "deployment record was made against a different node"
            );
        }
        if let Some(chain_id) = record.chain_id
            && !self.network.accepts_chain_id(chain_id)
        {
            tracing::warn!(
                record_chain_id = chain_id,
                expected_chain_id = ?self.network.chain_id(),
                "deployment record was made on a different chain"
            );
        }
        self.contract = record.contract_address;
        self
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new(NetworkTarget::devnet(None))
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub deployed_at: DateTime<Utc>,
    pub contract_address: Address,
    pub network_url: String,
    #[serde(default)]
    pub chain_id: Option<u64>,
}

impl DeploymentRecord {
    /// Reads a record file. A file holding a list of records yields the most
    /// recent one.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path).wrap_err_with(|| {
            format!("Failed to read deployment record: {}", path.display())
        })?;
        if let Ok(record) = serde_json::from_slice::<DeploymentRecord>(&data) {
            return Ok(record);
        }
        let records = serde_json::from_slice::<Vec<DeploymentRecord>>(&data)
            .wrap_err("Failed to parse deployment record JSON")?;
        records
            .into_iter()
            .max_by_key(|record| record.deployed_at)
            .ok_or_else(|| eyre!("Deployment record file {} is empty", path.display()))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)
            .wrap_err("Failed to serialize deployment record")?;
        fs::write(path.as_ref(), json).wrap_err("Failed to write deployment record")?;
        Ok(())
    }
}

pub fn resolve_path(raw: &str) -> PathBuf {
    let expanded = shellexpand::tilde(raw);
    PathBuf::from(expanded.into_owned())
}
