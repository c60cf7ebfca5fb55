//! Turns a terminal [`CallResult`] into state adapter mutations.
//!
//! The engine reports absolute post-execution balances. The host store only
//! exposes add/sub, so every balance is diffed against the current value
//! before it is applied. A result with `error` set commits nothing.

use core::cmp::Ordering;

use revm::primitives::{Address, Bytes};
use tracing::debug;

use crate::error::{BridgeError, Result};
use crate::messages::{CallResult, ModifiedAccount};
use crate::state::StateAdapter;

/// What the caller of `call`/`create` gets back after a successful invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outcome {
    pub return_data: Bytes,
    pub gas_left: u64,
    pub created_address: Option<Address>,
}

/// Apply `result` to `state` and build the caller-facing outcome.
///
/// Order is fixed: modified accounts, then deletions, then logs, then the
/// refund. Deleting an account that was also modified therefore wins.
pub fn reconcile<S>(state: &mut S, result: CallResult) -> Result<Outcome>
where
    S: StateAdapter + ?Sized,
{
    if result.error {
        debug!(gas_left = result.gas_remaining, "engine reported failure, discarding state diff");
        return Err(BridgeError::ExecutionFailed {
            return_data: result.return_data,
            gas_left: result.gas_remaining,
        });
    }

    let modified = result.modified_accounts.len();
    for account in result.modified_accounts {
        apply_account(state, account);
    }

    for addr in &result.deleted_accounts {
        let balance = state.get_balance(*addr);
        if !balance.is_zero() {
            state.sub_balance(*addr, balance);
        }
        state.remove(*addr);
    }

    let logs = result.logs.len();
    for log in result.logs {
        state.add_log(log.into());
    }

    state.add_refund(result.gas_refund);

    debug!(
        modified,
        deleted = result.deleted_accounts.len(),
        logs,
        refund = result.gas_refund,
        gas_left = result.gas_remaining,
        "applied state diff"
    );

    Ok(Outcome {
        return_data: result.return_data,
        gas_left: result.gas_remaining,
        created_address: result.created_address,
    })
}

fn apply_account<S>(state: &mut S, account: ModifiedAccount)
where
    S: StateAdapter + ?Sized,
{
    let addr = account.address;
    if !state.exist(addr) {
        state.create_account(addr);
        if !account.balance.is_zero() {
            state.add_balance(addr, account.balance);
        }
    } else {
        let current = state.get_balance(addr);
        match account.balance.cmp(&current) {
            Ordering::Greater => state.add_balance(addr, account.balance - current),
            Ordering::Less => state.sub_balance(addr, current - account.balance),
            Ordering::Equal => {}
        }
    }

    state.set_nonce(addr, account.nonce);
    state.set_code(addr, account.code);

    for (key, value) in account.storage_updates {
        state.set_state(addr, key, value);
    }
}
