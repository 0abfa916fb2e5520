//! Settlement passes.
//!
//! Two stateless, periodically-triggered batch passes share no in-memory
//! state between invocations: the deposit scanner credits newly observed
//! incoming value, the withdrawal tracker advances in-flight withdrawals
//! against chain confirmation depth. Every mutation is idempotent, so
//! overlapping passes are tolerated rather than prevented.

pub mod deposit;
pub mod reconcile;
pub mod withdrawal;

pub use deposit::{DepositPassSummary, DepositScanner};
pub use reconcile::{Reconciler, WalletDrift};
pub use withdrawal::{WithdrawalPassSummary, WithdrawalTracker};

use std::collections::HashMap;
use tracing::warn;

use crate::chain::HostChain;

/// Split items by host chain so independent families can run concurrently.
/// Items whose symbol the policy table cannot normalize are returned
/// separately for counting; they are skipped, not failed.
pub(crate) fn group_by_host<T>(
    items: Vec<T>,
    symbol_of: impl Fn(&T) -> &str,
) -> (HashMap<HostChain, Vec<T>>, usize) {
    let mut groups: HashMap<HostChain, Vec<T>> = HashMap::new();
    let mut unknown = 0usize;
    for item in items {
        match HostChain::from_symbol(symbol_of(&item)) {
            Some(host) => groups.entry(host).or_default().push(item),
            None => {
                warn!(symbol = symbol_of(&item), "unknown chain symbol, skipping");
                unknown += 1;
            }
        }
    }
    (groups, unknown)
}
