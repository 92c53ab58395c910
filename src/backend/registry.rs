//! Canonical backend table
//!
//! One descriptor per chain RPC endpoint. Every caller (scanner, sweeper,
//! diagnostics) reads the same table so endpoint data cannot drift.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::BackendsConfig;
use crate::error::{Error, Result};

/// Network class of a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkClass {
    Mainnet,
    Testnet,
}

impl std::fmt::Display for NetworkClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkClass::Mainnet => write!(f, "mainnet"),
            NetworkClass::Testnet => write!(f, "testnet"),
        }
    }
}

/// Which backend classes newly imported accounts are enabled on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkSelection {
    #[default]
    Mainnet,
    Testnet,
    All,
}

impl NetworkSelection {
    pub fn includes(&self, class: NetworkClass) -> bool {
        match self {
            NetworkSelection::Mainnet => class == NetworkClass::Mainnet,
            NetworkSelection::Testnet => class == NetworkClass::Testnet,
            NetworkSelection::All => true,
        }
    }
}

impl std::fmt::Display for NetworkSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkSelection::Mainnet => write!(f, "mainnet"),
            NetworkSelection::Testnet => write!(f, "testnet"),
            NetworkSelection::All => write!(f, "all"),
        }
    }
}

/// Immutable description of one chain endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendDescriptor {
    /// Unique identifier: "ethereum", "bsc-testnet"
    pub id: String,
    /// Human-readable name
    pub name: String,
    pub chain_id: u64,
    /// Native currency symbol
    pub currency: String,
    pub rpc_url: String,
    pub network: NetworkClass,
    /// Lower is checked first
    pub priority: u32,
}

struct BuiltinBackend {
    id: &'static str,
    name: &'static str,
    chain_id: u64,
    currency: &'static str,
    rpc_url: &'static str,
    network: NetworkClass,
    priority: u32,
}

const fn mainnet(
    id: &'static str,
    name: &'static str,
    chain_id: u64,
    currency: &'static str,
    rpc_url: &'static str,
    priority: u32,
) -> BuiltinBackend {
    BuiltinBackend {
        id,
        name,
        chain_id,
        currency,
        rpc_url,
        network: NetworkClass::Mainnet,
        priority,
    }
}

const fn testnet(
    id: &'static str,
    name: &'static str,
    chain_id: u64,
    currency: &'static str,
    rpc_url: &'static str,
    priority: u32,
) -> BuiltinBackend {
    BuiltinBackend {
        id,
        name,
        chain_id,
        currency,
        rpc_url,
        network: NetworkClass::Testnet,
        priority,
    }
}

const BUILTIN_BACKENDS: &[BuiltinBackend] = &[
    mainnet("ethereum", "Ethereum", 1, "ETH", "https://eth.llamarpc.com", 1),
    mainnet("bsc", "BNB Smart Chain", 56, "BNB", "https://bsc-dataseed.binance.org", 2),
    mainnet("polygon", "Polygon", 137, "POL", "https://polygon-rpc.com", 3),
    mainnet("arbitrum", "Arbitrum One", 42161, "ETH", "https://arb1.arbitrum.io/rpc", 4),
    mainnet("optimism", "OP Mainnet", 10, "ETH", "https://mainnet.optimism.io", 5),
    mainnet("base", "Base", 8453, "ETH", "https://mainnet.base.org", 6),
    mainnet("avalanche", "Avalanche C-Chain", 43114, "AVAX", "https://api.avax.network/ext/bc/C/rpc", 7),
    mainnet("fantom", "Fantom Opera", 250, "FTM", "https://rpc.ftm.tools", 8),
    mainnet("linea", "Linea", 59144, "ETH", "https://rpc.linea.build", 9),
    mainnet("zksync", "zkSync Era", 324, "ETH", "https://mainnet.era.zksync.io", 10),
    mainnet("gnosis", "Gnosis", 100, "xDAI", "https://rpc.gnosischain.com", 11),
    mainnet("cronos", "Cronos", 25, "CRO", "https://evm.cronos.org", 12),
    mainnet("celo", "Celo", 42220, "CELO", "https://forno.celo.org", 13),
    mainnet("moonbeam", "Moonbeam", 1284, "GLMR", "https://rpc.api.moonbeam.network", 14),
    mainnet("moonriver", "Moonriver", 1285, "MOVR", "https://rpc.api.moonriver.moonbeam.network", 15),
    mainnet("scroll", "Scroll", 534352, "ETH", "https://rpc.scroll.io", 16),
    mainnet("mantle", "Mantle", 5000, "MNT", "https://rpc.mantle.xyz", 17),
    mainnet("blast", "Blast", 81457, "ETH", "https://rpc.blast.io", 18),
    mainnet("polygon-zkevm", "Polygon zkEVM", 1101, "ETH", "https://zkevm-rpc.com", 19),
    mainnet("opbnb", "opBNB", 204, "BNB", "https://opbnb-mainnet-rpc.bnbchain.org", 20),
    mainnet("metis", "Metis Andromeda", 1088, "METIS", "https://andromeda.metis.io/?owner=1088", 21),
    mainnet("kava", "Kava EVM", 2222, "KAVA", "https://evm.kava.io", 22),
    mainnet("aurora", "Aurora", 1313161554, "ETH", "https://mainnet.aurora.dev", 23),
    mainnet("harmony", "Harmony", 1666600000, "ONE", "https://api.harmony.one", 24),
    mainnet("klaytn", "Kaia", 8217, "KAIA", "https://public-en.node.kaia.io", 25),
    mainnet("core", "Core", 1116, "CORE", "https://rpc.coredao.org", 26),
    mainnet("boba", "Boba Network", 288, "ETH", "https://mainnet.boba.network", 27),
    mainnet("fuse", "Fuse", 122, "FUSE", "https://rpc.fuse.io", 28),
    mainnet("zora", "Zora", 7777777, "ETH", "https://rpc.zora.energy", 29),
    mainnet("ethereum-classic", "Ethereum Classic", 61, "ETC", "https://etc.rivet.link", 30),
    testnet("sepolia", "Ethereum Sepolia", 11155111, "ETH", "https://rpc.sepolia.org", 101),
    testnet("holesky", "Ethereum Holesky", 17000, "ETH", "https://ethereum-holesky-rpc.publicnode.com", 102),
    testnet("bsc-testnet", "BNB Smart Chain Testnet", 97, "tBNB", "https://data-seed-prebsc-1-s1.binance.org:8545", 103),
    testnet("polygon-amoy", "Polygon Amoy", 80002, "POL", "https://rpc-amoy.polygon.technology", 104),
    testnet("arbitrum-sepolia", "Arbitrum Sepolia", 421614, "ETH", "https://sepolia-rollup.arbitrum.io/rpc", 105),
    testnet("optimism-sepolia", "OP Sepolia", 11155420, "ETH", "https://sepolia.optimism.io", 106),
    testnet("base-sepolia", "Base Sepolia", 84532, "ETH", "https://sepolia.base.org", 107),
    testnet("avalanche-fuji", "Avalanche Fuji", 43113, "AVAX", "https://api.avax-test.network/ext/bc/C/rpc", 108),
    testnet("linea-sepolia", "Linea Sepolia", 59141, "ETH", "https://rpc.sepolia.linea.build", 109),
    testnet("scroll-sepolia", "Scroll Sepolia", 534351, "ETH", "https://sepolia-rpc.scroll.io", 110),
];

/// Registry of backend descriptors, sorted by priority
#[derive(Debug, Clone)]
pub struct BackendRegistry {
    backends: Vec<BackendDescriptor>,
    by_id: HashMap<String, usize>,
}

impl BackendRegistry {
    /// The built-in backend table
    pub fn builtin() -> Self {
        let backends = BUILTIN_BACKENDS
            .iter()
            .map(|b| BackendDescriptor {
                id: b.id.to_string(),
                name: b.name.to_string(),
                chain_id: b.chain_id,
                currency: b.currency.to_string(),
                rpc_url: b.rpc_url.to_string(),
                network: b.network,
                priority: b.priority,
            })
            .collect();

        Self::from_descriptors(backends)
    }

    /// Built-in table with configured URL overrides and removals applied
    pub fn from_config(config: &BackendsConfig) -> Result<Self> {
        let builtin = Self::builtin();

        for id in config.overrides.keys().chain(config.disabled.iter()) {
            if builtin.get(id).is_none() {
                return Err(Error::UnknownBackend(id.clone()));
            }
        }

        let backends = builtin
            .backends
            .into_iter()
            .filter(|b| !config.disabled.contains(&b.id))
            .map(|mut b| {
                if let Some(endpoint) = config.overrides.get(&b.id) {
                    debug!(backend = %b.id, "Using endpoint override");
                    b.rpc_url = endpoint.clone();
                }
                b
            })
            .collect();

        let registry = Self::from_descriptors(backends);
        info!("Backend registry loaded with {} backends", registry.len());
        Ok(registry)
    }

    /// Build from an arbitrary descriptor list. Duplicate ids keep the first entry.
    pub fn from_descriptors(mut backends: Vec<BackendDescriptor>) -> Self {
        backends.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));

        let mut by_id = HashMap::with_capacity(backends.len());
        let mut unique = Vec::with_capacity(backends.len());
        for backend in backends {
            if by_id.contains_key(&backend.id) {
                continue;
            }
            by_id.insert(backend.id.clone(), unique.len());
            unique.push(backend);
        }

        Self {
            backends: unique,
            by_id,
        }
    }

    /// All backends in priority order
    pub fn all(&self) -> &[BackendDescriptor] {
        &self.backends
    }

    pub fn get(&self, id: &str) -> Option<&BackendDescriptor> {
        self.by_id.get(id).map(|&idx| &self.backends[idx])
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Backends of one class, in priority order
    pub fn by_network(&self, class: NetworkClass) -> Vec<&BackendDescriptor> {
        self.backends.iter().filter(|b| b.network == class).collect()
    }

    pub fn mainnets(&self) -> Vec<&BackendDescriptor> {
        self.by_network(NetworkClass::Mainnet)
    }

    pub fn testnets(&self) -> Vec<&BackendDescriptor> {
        self.by_network(NetworkClass::Testnet)
    }

    /// Ids selected by a network selection, in priority order
    pub fn ids_for(&self, selection: NetworkSelection) -> Vec<String> {
        self.backends
            .iter()
            .filter(|b| selection.includes(b.network))
            .map(|b| b.id.clone())
            .collect()
    }

    /// The N highest-priority backends of a selection
    pub fn top(&self, selection: NetworkSelection, n: usize) -> Vec<&BackendDescriptor> {
        self.backends
            .iter()
            .filter(|b| selection.includes(b.network))
            .take(n)
            .collect()
    }

    /// Resolve a set of ids into descriptors, in priority order. Unknown ids are skipped.
    pub fn ordered<'a, I>(&self, ids: I) -> Vec<&BackendDescriptor>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut resolved: Vec<&BackendDescriptor> =
            ids.into_iter().filter_map(|id| self.get(id)).collect();
        resolved.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
        resolved.dedup_by(|a, b| a.id == b.id);
        resolved
    }
}
