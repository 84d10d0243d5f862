//! Collateralized loan ledger.
//!
//! * [`contracts`]: the loan lifecycle state machine (`CollateralizedLoan`).
//! * [`ledger`]: the value transfer substrate: balances, custody, clock and
//!   event log.
//! * [`signer`]: ed25519 identities and signed loan actions.
//! * [`scenario`]: scripted sessions used by the CLI.

pub mod config;
pub mod contracts;
pub mod ledger;
pub mod logging;
pub mod scenario;
pub mod signer;

pub use contracts::{
    CollateralizedLoan, Loan, LoanError, LoanEvent, LoanId, LoanPolicy, LoanState, Role,
};
pub use ledger::{LedgerError, LedgerEvent, LedgerState};
