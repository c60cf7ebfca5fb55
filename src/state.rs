//! Capability interface the bridge needs from the host's state store.
//!
//! The bridge never owns state: queries from the engine are served through
//! [`StateAdapter`] reads, and the final state diff is applied through its
//! mutators. Implementations are not required to be thread-safe; the bridge
//! only touches an adapter from the thread driving the invocation. Hosts that
//! share one store between concurrent sessions must synchronize it themselves.

use revm::primitives::{keccak256, Address, Bytes, Log, B256, KECCAK_EMPTY, U256};
use std::collections::{HashMap, HashSet};

/// State store operations consumed by the query loop and the reconciler.
pub trait StateAdapter {
    fn create_account(&mut self, addr: Address);

    fn get_balance(&self, addr: Address) -> U256;
    fn add_balance(&mut self, addr: Address, amount: U256);
    fn sub_balance(&mut self, addr: Address, amount: U256);

    fn get_nonce(&self, addr: Address) -> u64;
    fn set_nonce(&mut self, addr: Address, nonce: u64);

    /// Empty bytes for unknown accounts.
    fn get_code(&self, addr: Address) -> Bytes;
    fn set_code(&mut self, addr: Address, code: Bytes);
    fn get_code_hash(&self, addr: Address) -> B256;
    fn get_code_size(&self, addr: Address) -> usize;

    /// Zero for unset cells.
    fn get_state(&self, addr: Address, key: B256) -> B256;
    fn set_state(&mut self, addr: Address, key: B256, value: B256);

    fn exist(&self, addr: Address) -> bool;
    fn empty(&self, addr: Address) -> bool;
    /// Mark the account removed. Returns whether it existed.
    fn remove(&mut self, addr: Address) -> bool;

    fn add_refund(&mut self, gas: u64);
    fn add_log(&mut self, log: Log);
}

/// Resolves the hash of the block `distance` blocks behind the current one.
pub trait BlockHashResolver {
    fn hash(&self, distance: u64) -> B256;
}

impl<F> BlockHashResolver for F
where
    F: Fn(u64) -> B256,
{
    fn hash(&self, distance: u64) -> B256 {
        self(distance)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemoryAccount {
    pub balance: U256,
    pub nonce: u64,
    pub code: Bytes,
    pub code_hash: B256,
    pub storage: HashMap<B256, B256>,
}

impl MemoryAccount {
    fn new() -> Self {
        Self { code_hash: KECCAK_EMPTY, ..Default::default() }
    }
}

/// In-memory [`StateAdapter`] for embedders without a persistent store, and for tests.
#[derive(Clone, Debug, Default)]
pub struct MemoryState {
    accounts: HashMap<Address, MemoryAccount>,
    removed: HashSet<Address>,
    logs: Vec<Log>,
    refund: u64,
}

impl MemoryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an account with a balance, creating it if needed.
    pub fn with_balance(mut self, addr: Address, balance: U256) -> Self {
        self.account_mut(addr).balance = balance;
        self
    }

    pub fn with_code(mut self, addr: Address, code: Bytes) -> Self {
        self.set_code(addr, code);
        self
    }

    pub fn with_storage(mut self, addr: Address, key: B256, value: B256) -> Self {
        self.set_state(addr, key, value);
        self
    }

    pub fn account(&self, addr: &Address) -> Option<&MemoryAccount> {
        self.accounts.get(addr)
    }

    pub fn logs(&self) -> &[Log] {
        &self.logs
    }

    pub fn refund(&self) -> u64 {
        self.refund
    }

    /// Addresses marked removed and not re-created since.
    pub fn is_removed(&self, addr: &Address) -> bool {
        self.removed.contains(addr)
    }

    fn account_mut(&mut self, addr: Address) -> &mut MemoryAccount {
        self.removed.remove(&addr);
        self.accounts.entry(addr).or_insert_with(MemoryAccount::new)
    }
}

impl StateAdapter for MemoryState {
    fn create_account(&mut self, addr: Address) {
        // Keeps the balance of a pre-existing account, like a host state DB does.
        let balance = self.get_balance(addr);
        self.removed.remove(&addr);
        self.accounts.insert(addr, MemoryAccount { balance, ..MemoryAccount::new() });
    }

    fn get_balance(&self, addr: Address) -> U256 {
        self.accounts.get(&addr).map(|acc| acc.balance).unwrap_or_default()
    }

    fn add_balance(&mut self, addr: Address, amount: U256) {
        let account = self.account_mut(addr);
        account.balance = account.balance.saturating_add(amount);
    }

    fn sub_balance(&mut self, addr: Address, amount: U256) {
        let account = self.account_mut(addr);
        account.balance = account.balance.saturating_sub(amount);
    }

    fn get_nonce(&self, addr: Address) -> u64 {
        self.accounts.get(&addr).map(|acc| acc.nonce).unwrap_or_default()
    }

    fn set_nonce(&mut self, addr: Address, nonce: u64) {
        self.account_mut(addr).nonce = nonce;
    }

    fn get_code(&self, addr: Address) -> Bytes {
        self.accounts.get(&addr).map(|acc| acc.code.clone()).unwrap_or_default()
    }

    fn set_code(&mut self, addr: Address, code: Bytes) {
        let account = self.account_mut(addr);
        account.code_hash = if code.is_empty() { KECCAK_EMPTY } else { keccak256(&code) };
        account.code = code;
    }

    fn get_code_hash(&self, addr: Address) -> B256 {
        self.accounts.get(&addr).map(|acc| acc.code_hash).unwrap_or_default()
    }

    fn get_code_size(&self, addr: Address) -> usize {
        self.accounts.get(&addr).map(|acc| acc.code.len()).unwrap_or_default()
    }

    fn get_state(&self, addr: Address, key: B256) -> B256 {
        self.accounts
            .get(&addr)
            .and_then(|acc| acc.storage.get(&key).copied())
            .unwrap_or_default()
    }

    fn set_state(&mut self, addr: Address, key: B256, value: B256) {
        let storage = &mut self.account_mut(addr).storage;
        if value.is_zero() {
            storage.remove(&key);
        } else {
            storage.insert(key, value);
        }
    }

    fn exist(&self, addr: Address) -> bool {
        self.accounts.contains_key(&addr)
    }

    fn empty(&self, addr: Address) -> bool {
        self.accounts
            .get(&addr)
            .map_or(true, |acc| acc.balance.is_zero() && acc.nonce == 0 && acc.code.is_empty())
    }

    fn remove(&mut self, addr: Address) -> bool {
        let existed = self.accounts.remove(&addr).is_some();
        if existed {
            self.removed.insert(addr);
        }
        existed
    }

    fn add_refund(&mut self, gas: u64) {
        self.refund = self.refund.saturating_add(gas);
    }

    fn add_log(&mut self, log: Log) {
        self.logs.push(log);
    }
}
