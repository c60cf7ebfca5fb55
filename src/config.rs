//! Bridge configuration: where the engine lives, how long to wait for it, and
//! which fork rules it should apply.

use std::collections::BTreeMap;
use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::DEFAULT_MAX_FRAME_LEN;
use crate::transport::Endpoint;

/// Hard forks the engine selects semantics by.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Fork {
    Homestead,
    DaoFork,
    Tangerine,
    SpuriousDragon,
    Byzantium,
    Constantinople,
    Petersburg,
    Istanbul,
    MuirGlacier,
    Berlin,
    London,
}

/// Chain parameters forwarded to the engine in the handshake.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainConfig {
    pub chain_id: u64,
    /// Activation block per fork. Forks not listed are never active.
    pub forks: BTreeMap<Fork, u64>,
}

/// Predefined chain configurations
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainPreset {
    /// Ethereum mainnet (chain ID 1)
    EthereumMainnet = 0,
    /// BSC mainnet (chain ID 56)
    BSCMainnet = 1,
    /// BSC testnet Chapel (chain ID 97)
    BSCTestnet = 2,
    /// Custom configuration
    Custom = 255,
}

impl ChainConfig {
    pub fn new(chain_id: u64) -> Self {
        Self { chain_id, forks: BTreeMap::new() }
    }

    pub fn with_fork(mut self, fork: Fork, block: u64) -> Self {
        self.forks.insert(fork, block);
        self
    }

    pub fn preset(preset: ChainPreset) -> Self {
        match preset {
            ChainPreset::EthereumMainnet => Self::new(1)
                .with_fork(Fork::Homestead, 1_150_000)
                .with_fork(Fork::DaoFork, 1_920_000)
                .with_fork(Fork::Tangerine, 2_463_000)
                .with_fork(Fork::SpuriousDragon, 2_675_000)
                .with_fork(Fork::Byzantium, 4_370_000)
                .with_fork(Fork::Constantinople, 7_280_000)
                .with_fork(Fork::Petersburg, 7_280_000)
                .with_fork(Fork::Istanbul, 9_069_000)
                .with_fork(Fork::MuirGlacier, 9_200_000)
                .with_fork(Fork::Berlin, 12_244_000)
                .with_fork(Fork::London, 12_965_000),
            // BSC launched with everything up to Petersburg active at genesis.
            ChainPreset::BSCMainnet | ChainPreset::BSCTestnet => {
                let chain_id = if preset == ChainPreset::BSCMainnet { 56 } else { 97 };
                [
                    Fork::Homestead,
                    Fork::Tangerine,
                    Fork::SpuriousDragon,
                    Fork::Byzantium,
                    Fork::Constantinople,
                    Fork::Petersburg,
                ]
                .into_iter()
                .fold(Self::new(chain_id), |config, fork| config.with_fork(fork, 0))
            }
            ChainPreset::Custom => Self::default(),
        }
    }

    pub fn is_active(&self, fork: Fork, block: u64) -> bool {
        self.forks.get(&fork).is_some_and(|activation| block >= *activation)
    }

    /// Text form carried in the Hello message.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection settings for a [`Session`](crate::Session).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BridgeConfig {
    pub endpoint: Endpoint,
    pub connect_timeout: Duration,
    /// Deadline for receiving each engine frame. `None` waits forever.
    pub read_timeout: Option<Duration>,
    pub max_frame_len: u32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: Some(DEFAULT_READ_TIMEOUT),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl BridgeConfig {
    pub fn new(endpoint: Endpoint) -> Self {
        Self { endpoint, ..Default::default() }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// A zero timeout is treated like `None`, as with `KEVM_READ_TIMEOUT_MS=0`.
    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout.filter(|t| !t.is_zero());
        self
    }

    pub fn with_max_frame_len(mut self, max_frame_len: u32) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// Defaults overridden by `KEVM_ENDPOINT`, `KEVM_CONNECT_TIMEOUT_MS` and
    /// `KEVM_READ_TIMEOUT_MS` (0 disables the read deadline).
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();
        if let Ok(endpoint) = env::var("KEVM_ENDPOINT") {
            config.endpoint = endpoint.parse()?;
        }
        if let Some(ms) = env_millis("KEVM_CONNECT_TIMEOUT_MS")? {
            config.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env_millis("KEVM_READ_TIMEOUT_MS")? {
            config.read_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        Ok(config)
    }
}

fn env_millis(key: &str) -> anyhow::Result<Option<u64>> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("invalid {key}={raw}: {e}")),
        Err(_) => Ok(None),
    }
}
