//! In-memory value transfer substrate.
//!
//! Holds account balances (spendable and locked in custody), a trusted clock
//! and an append-only event log. Contracts never touch balances directly: they
//! hand a batch of [`LedgerMutation`]s to [`LedgerState::apply_mutations`],
//! which either commits the whole batch or leaves the state untouched.

mod amount;
mod clock;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, trace};

use crate::contracts::{ContractAddress, LoanEvent};

pub use amount::{format_units, parse_units, UNIT_SCALE};
pub use clock::{Clock, ManualClock, SystemClock};

pub type AccountId = String;
pub type Amount = u64;
pub type Timestamp = u64;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("insufficient funds in account {account}: need {needed}, have {available}")]
    InsufficientAccountFunds {
        account: AccountId,
        needed: Amount,
        available: Amount,
    },
    #[error("insufficient locked funds in account {account}")]
    InsufficientLockedFunds { account: AccountId },
    #[error("unknown account {account}")]
    UnknownAccount { account: AccountId },
    #[error("balance overflow in account {account}")]
    BalanceOverflow { account: AccountId },
    #[error("invalid amount {0:?}")]
    InvalidAmount(String),
    #[error("clock cannot be advanced manually")]
    FixedClock,
    #[error("advancing clock at {now} by {secs}s overflows")]
    ClockOverflow { now: Timestamp, secs: u64 },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AccountBalance {
    pub available: Amount,
    pub locked: Amount,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SnapshotMetadata {
    pub height: u64,
    pub timestamp: Timestamp,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub meta: SnapshotMetadata,
    pub accounts: BTreeMap<AccountId, AccountBalance>,
    pub events: Vec<LedgerEvent>,
    pub state_root: [u8; 32],
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    Emission {
        to: AccountId,
        amount: Amount,
        reason: String,
    },
    Transfer {
        from: AccountId,
        to: AccountId,
        amount: Amount,
        memo: Option<String>,
    },
    Locked {
        account: AccountId,
        amount: Amount,
    },
    Released {
        account: AccountId,
        amount: Amount,
    },
    Seized {
        from: AccountId,
        to: AccountId,
        amount: Amount,
    },
    Contract {
        contract: ContractAddress,
        event: LoanEvent,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerMutation {
    Emit {
        to: AccountId,
        amount: Amount,
        reason: String,
    },
    Transfer {
        from: AccountId,
        to: AccountId,
        amount: Amount,
        memo: Option<String>,
    },
    /// Moves spendable funds of `account` into custody.
    Lock { account: AccountId, amount: Amount },
    /// Returns custody funds of `account` to its spendable balance.
    Release { account: AccountId, amount: Amount },
    /// Moves custody funds of `from` to the spendable balance of `to`.
    Seize {
        from: AccountId,
        to: AccountId,
        amount: Amount,
    },
    Notify {
        contract: ContractAddress,
        event: LoanEvent,
    },
}

/// Position in the event log. Obtained from [`LedgerState::subscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct EventCursor {
    next: usize,
}

impl EventCursor {
    pub fn from_start() -> Self {
        Self::default()
    }
}

static NEXT_LEDGER_ID: AtomicU64 = AtomicU64::new(0);

pub struct LedgerState {
    id: u64,
    meta: SnapshotMetadata,
    accounts: BTreeMap<AccountId, AccountBalance>,
    events: Vec<LedgerEvent>,
    clock: Box<dyn Clock>,
    deploy_nonce: u64,
}

impl Default for LedgerState {
    fn default() -> Self {
        Self::with_clock(ManualClock::new(0))
    }
}

impl LedgerState {
    /// Ledger driven by a manual clock starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clock(clock: impl Clock + 'static) -> Self {
        let timestamp = clock.now();
        Self {
            id: NEXT_LEDGER_ID.fetch_add(1, Ordering::Relaxed),
            meta: SnapshotMetadata {
                height: 0,
                timestamp,
            },
            accounts: BTreeMap::new(),
            events: Vec::new(),
            clock: Box::new(clock),
            deploy_nonce: 0,
        }
    }

    /// Identifies this ledger instance within the process.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn meta(&self) -> &SnapshotMetadata {
        &self.meta
    }

    /// Current time. Never goes backwards, even if the clock does.
    pub fn now(&self) -> Timestamp {
        self.clock.now().max(self.meta.timestamp)
    }

    pub fn advance_time(&mut self, secs: u64) -> Result<Timestamp, LedgerError> {
        self.clock.advance(secs)?;
        let now = self.now();
        self.meta.timestamp = now;
        debug!(secs, now, "advanced ledger clock");
        Ok(now)
    }

    pub fn balance(&self, account: &str) -> AccountBalance {
        self.accounts.get(account).cloned().unwrap_or_default()
    }

    pub fn accounts(&self) -> &BTreeMap<AccountId, AccountBalance> {
        &self.accounts
    }

    /// Credits fresh funds to `account`, outside of any contract action.
    pub fn mint(&mut self, account: &str, amount: Amount, reason: &str) -> Result<(), LedgerError> {
        self.apply_mutations(&[LedgerMutation::Emit {
            to: account.to_string(),
            amount,
            reason: reason.to_string(),
        }])
    }

    pub(crate) fn next_deploy_nonce(&mut self) -> u64 {
        let nonce = self.deploy_nonce;
        self.deploy_nonce += 1;
        nonce
    }

    pub fn events(&self) -> &[LedgerEvent] {
        &self.events
    }

    /// Cursor positioned after the last recorded event.
    pub fn subscribe(&self) -> EventCursor {
        EventCursor {
            next: self.events.len(),
        }
    }

    /// Events recorded since the cursor was last polled.
    pub fn poll(&self, cursor: &mut EventCursor) -> &[LedgerEvent] {
        let start = cursor.next.min(self.events.len());
        cursor.next = self.events.len();
        &self.events[start..]
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            meta: self.meta.clone(),
            accounts: self.accounts.clone(),
            events: self.events.clone(),
            state_root: compute_state_root(&self.accounts),
        }
    }

    /// Applies the batch atomically: the mutations run against a staged copy
    /// of the balances and are committed only if every one succeeds.
    pub fn apply_mutations(&mut self, mutations: &[LedgerMutation]) -> Result<(), LedgerError> {
        let mut staged = self.accounts.clone();
        let mut events = Vec::with_capacity(mutations.len());

        for mutation in mutations {
            match mutation {
                LedgerMutation::Emit { to, amount, reason } => {
                    credit(&mut staged, to, *amount)?;
                    events.push(LedgerEvent::Emission {
                        to: to.clone(),
                        amount: *amount,
                        reason: reason.clone(),
                    });
                }
                LedgerMutation::Transfer {
                    from,
                    to,
                    amount,
                    memo,
                } => {
                    debit(&mut staged, from, *amount)?;
                    credit(&mut staged, to, *amount)?;
                    events.push(LedgerEvent::Transfer {
                        from: from.clone(),
                        to: to.clone(),
                        amount: *amount,
                        memo: memo.clone(),
                    });
                }
                LedgerMutation::Lock { account, amount } => {
                    debit(&mut staged, account, *amount)?;
                    let balance = staged.entry(account.clone()).or_default();
                    balance.locked = balance.locked.checked_add(*amount).ok_or_else(|| {
                        LedgerError::BalanceOverflow {
                            account: account.clone(),
                        }
                    })?;
                    events.push(LedgerEvent::Locked {
                        account: account.clone(),
                        amount: *amount,
                    });
                }
                LedgerMutation::Release { account, amount } => {
                    unlock(&mut staged, account, *amount)?;
                    credit(&mut staged, account, *amount)?;
                    events.push(LedgerEvent::Released {
                        account: account.clone(),
                        amount: *amount,
                    });
                }
                LedgerMutation::Seize { from, to, amount } => {
                    unlock(&mut staged, from, *amount)?;
                    credit(&mut staged, to, *amount)?;
                    events.push(LedgerEvent::Seized {
                        from: from.clone(),
                        to: to.clone(),
                        amount: *amount,
                    });
                }
                LedgerMutation::Notify { contract, event } => {
                    events.push(LedgerEvent::Contract {
                        contract: contract.clone(),
                        event: event.clone(),
                    });
                }
            }
        }

        self.accounts = staged;
        self.events.extend(events);
        self.meta.height += 1;
        self.meta.timestamp = self.now();
        trace!(height = self.meta.height, count = mutations.len(), "applied mutations");
        Ok(())
    }
}

fn credit(
    accounts: &mut BTreeMap<AccountId, AccountBalance>,
    account: &AccountId,
    amount: Amount,
) -> Result<(), LedgerError> {
    let balance = accounts.entry(account.clone()).or_default();
    balance.available =
        balance
            .available
            .checked_add(amount)
            .ok_or_else(|| LedgerError::BalanceOverflow {
                account: account.clone(),
            })?;
    Ok(())
}

fn debit(
    accounts: &mut BTreeMap<AccountId, AccountBalance>,
    account: &AccountId,
    amount: Amount,
) -> Result<(), LedgerError> {
    let balance = accounts
        .get_mut(account)
        .ok_or_else(|| LedgerError::UnknownAccount {
            account: account.clone(),
        })?;
    if balance.available < amount {
        return Err(LedgerError::InsufficientAccountFunds {
            account: account.clone(),
            needed: amount,
            available: balance.available,
        });
    }
    balance.available -= amount;
    Ok(())
}

fn unlock(
    accounts: &mut BTreeMap<AccountId, AccountBalance>,
    account: &AccountId,
    amount: Amount,
) -> Result<(), LedgerError> {
    let balance = accounts
        .get_mut(account)
        .ok_or_else(|| LedgerError::UnknownAccount {
            account: account.clone(),
        })?;
    if balance.locked < amount {
        return Err(LedgerError::InsufficientLockedFunds {
            account: account.clone(),
        });
    }
    balance.locked -= amount;
    Ok(())
}

fn compute_state_root(accounts: &BTreeMap<AccountId, AccountBalance>) -> [u8; 32] {
    let leaves = accounts
        .iter()
        .map(|(account, balance)| {
            let mut hasher = Sha256::new();
            hasher.update(b"acct");
            hasher.update(account.as_bytes());
            hasher.update(balance.available.to_le_bytes());
            hasher.update(balance.locked.to_le_bytes());
            hasher.finalize().into()
        })
        .collect();
    build_merkle(leaves)
}

fn build_merkle(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return Sha256::digest(b"loan-ledger-empty").into();
    }
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity((leaves.len() + 1) / 2);
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            hasher.update(chunk.get(1).unwrap_or(&chunk[0]));
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}
