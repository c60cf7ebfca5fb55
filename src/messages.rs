//! Protocol messages exchanged with the remote execution engine.
//!
//! The client speaks [`ClientMessage`], the engine speaks [`VmQuery`]. Both are
//! plain serde enums so the payload tag alone discriminates the message kind.
//!
//! Balances and call values travel as minimal big-endian byte strings (see
//! [`amount`]); everything else uses the natural encoding of the revm primitives.

use revm::primitives::{Address, Bytes, Log, B256, U256};
use serde::{Deserialize, Serialize};

/// Wire version written in front of every frame.
pub const PROTOCOL_VERSION: u8 = 1;

/// First message on a fresh connection. Never acknowledged.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    pub protocol_version: u8,
    /// JSON text of a [`ChainConfig`](crate::ChainConfig).
    pub chain_config: String,
}

/// A call or contract creation to execute. `recipient == None` means create.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallContext {
    pub caller: Address,
    pub recipient: Option<Address>,
    pub input: Bytes,
    #[serde(with = "amount")]
    pub value: U256,
    pub gas: u64,
}

impl CallContext {
    pub fn is_create(&self) -> bool {
        self.recipient.is_none()
    }
}

/// Everything the client sends.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientMessage {
    Hello(Hello),
    CallContext(CallContext),
    Response(QueryResponse),
}

/// Everything the engine sends: a state query, or the terminal result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VmQuery {
    GetCode(Address),
    GetAccount(Address),
    GetBlockhash(u64),
    GetStorageData(Address, B256),
    CallResult(CallResult),
}

impl VmQuery {
    /// Short label used in logs and per-invocation counters.
    pub fn kind(&self) -> &'static str {
        match self {
            VmQuery::GetCode(_) => "get_code",
            VmQuery::GetAccount(_) => "get_account",
            VmQuery::GetBlockhash(_) => "get_blockhash",
            VmQuery::GetStorageData(..) => "get_storage_data",
            VmQuery::CallResult(_) => "call_result",
        }
    }
}

/// Reply to exactly one [`VmQuery`] state query.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryResponse {
    Code(Bytes),
    Account(AccountData),
    Blockhash(B256),
    StorageData(B256),
}

/// Account snapshot returned for `GetAccount`.
///
/// `code_empty` and `code_hash` are mutually exclusive: when the account has
/// no code `code_empty` is set and `code_hash` stays zero.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountData {
    pub exists: bool,
    #[serde(with = "amount")]
    pub balance: U256,
    pub nonce: u64,
    pub code_empty: bool,
    pub code_hash: B256,
}

impl AccountData {
    /// Reply for an address the host does not know about.
    pub fn absent() -> Self {
        Self::default()
    }
}

/// Post-execution snapshot of one account. `balance` is absolute, not a delta.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifiedAccount {
    pub address: Address,
    #[serde(with = "amount")]
    pub balance: U256,
    pub nonce: u64,
    pub code: Bytes,
    /// Applied in order; a later entry for the same key wins.
    pub storage_updates: Vec<(B256, B256)>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
}

impl From<LogEntry> for Log {
    fn from(entry: LogEntry) -> Self {
        Log::new_unchecked(entry.address, entry.topics, entry.data)
    }
}

/// Terminal message of an invocation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallResult {
    pub error: bool,
    pub return_data: Bytes,
    pub gas_remaining: u64,
    pub gas_refund: u64,
    pub modified_accounts: Vec<ModifiedAccount>,
    pub deleted_accounts: Vec<Address>,
    pub logs: Vec<LogEntry>,
    /// Address assigned to the contract deployed by a create request.
    pub created_address: Option<Address>,
}

/// Serde adapter encoding a [`U256`] as a minimal big-endian byte string.
///
/// Zero encodes as the empty string. Decoding rejects strings wider than 32 bytes.
pub mod amount {
    use revm::primitives::U256;
    use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        value.to_be_bytes_trimmed_vec().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let bytes = Vec::<u8>::deserialize(deserializer)?;
        U256::try_from_be_slice(&bytes)
            .ok_or_else(|| D::Error::custom(format!("amount of {} bytes overflows 256 bits", bytes.len())))
    }
}
