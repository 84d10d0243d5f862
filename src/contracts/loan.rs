//! The collateralized loan state machine.
//!
//! ```text
//! Requested --fund_loan(exact amount)----------------> Funded
//! Funded    --repay_loan(exact amount, at/before due)--> Repaid     [terminal]
//! Funded    --claim_collateral(after due)--------------> Defaulted  [terminal]
//! ```
//!
//! Every action validates all of its preconditions before handing a single
//! mutation batch to the ledger, so a rejected action has no effect.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{derive_contract_address, ContractAddress, LoanEvent, LoanPolicy, Role};
use crate::ledger::{AccountId, Amount, LedgerError, LedgerMutation, LedgerState, Timestamp};
use crate::signer::{LoanAction, SignatureError, SignedAction};

pub type LoanId = u64;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum LoanError {
    #[error("loan {loan_id} not found")]
    NotFound { loan_id: LoanId },
    #[error("collateral {collateral} is too small to back a loan")]
    InvalidCollateral { collateral: Amount },
    #[error("incorrect payment amount: expected {expected}, got {supplied}")]
    InvalidPayment { expected: Amount, supplied: Amount },
    #[error("loan is not yet due: due at {due}, now {now}")]
    NotYetDue { due: Timestamp, now: Timestamp },
    #[error("loan is overdue: was due at {due}, now {now}")]
    Overdue { due: Timestamp, now: Timestamp },
    #[error("loan {loan_id} already settled ({state:?})")]
    AlreadySettled { loan_id: LoanId, state: LoanState },
    #[error("loan {loan_id} already funded")]
    AlreadyFunded { loan_id: LoanId },
    #[error("loan {loan_id} has not been funded")]
    NotFunded { loan_id: LoanId },
    #[error("{account} is not the {role} of this loan")]
    Unauthorized { account: AccountId, role: Role },
    #[error("amount overflow")]
    AmountOverflow,
    #[error("action already executed")]
    DuplicateAction,
    #[error("action signed for contract {signed_for}, not {contract}")]
    WrongContract {
        contract: ContractAddress,
        signed_for: ContractAddress,
    },
    #[error("contract was deployed on ledger {deployed_on}, not {ledger}")]
    WrongLedger { deployed_on: u64, ledger: u64 },
    #[error(transparent)]
    Signature(#[from] SignatureError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LoanState {
    Requested,
    Funded,
    Repaid,
    Defaulted,
}

impl LoanState {
    pub fn is_terminal(self) -> bool {
        matches!(self, LoanState::Repaid | LoanState::Defaulted)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Loan {
    pub id: LoanId,
    pub borrower: AccountId,
    pub lender: Option<AccountId>,
    pub collateral_amount: Amount,
    pub loan_amount: Amount,
    pub repayment_amount: Amount,
    pub interest_rate_pct: u32,
    pub duration_secs: u64,
    pub created_at: Timestamp,
    pub funded_at: Option<Timestamp>,
    pub due_timestamp: Option<Timestamp>,
    pub settled_at: Option<Timestamp>,
    pub state: LoanState,
}

impl Loan {
    pub fn party(&self, role: Role) -> Option<&AccountId> {
        match role {
            Role::Borrower => Some(&self.borrower),
            Role::Lender => self.lender.as_ref(),
        }
    }

    fn require_party(&self, role: Role, caller: &str) -> Result<(), LoanError> {
        match self.party(role) {
            Some(party) if party == caller => Ok(()),
            _ => Err(LoanError::Unauthorized {
                account: caller.to_string(),
                role,
            }),
        }
    }

    /// Rejects anything that is not `Funded`.
    fn require_funded(&self) -> Result<Timestamp, LoanError> {
        match (self.state, self.due_timestamp) {
            (LoanState::Funded, Some(due)) => Ok(due),
            (LoanState::Requested, _) | (LoanState::Funded, None) => {
                Err(LoanError::NotFunded { loan_id: self.id })
            }
            (state, _) => Err(LoanError::AlreadySettled {
                loan_id: self.id,
                state,
            }),
        }
    }
}

/// A contract stays bound to the ledger it was deployed on; every action
/// taking another ledger fails with [`LoanError::WrongLedger`].
pub struct CollateralizedLoan {
    address: ContractAddress,
    ledger_id: u64,
    policy: LoanPolicy,
    loans: BTreeMap<LoanId, Loan>,
    next_id: LoanId,
    executed: BTreeSet<[u8; 32]>,
}

impl CollateralizedLoan {
    /// Instantiates a fresh contract on `ledger`.
    pub fn deploy(ledger: &mut LedgerState, deployer: &str, policy: LoanPolicy) -> Self {
        let nonce = ledger.next_deploy_nonce();
        let address = derive_contract_address(deployer, nonce);
        info!(%address, deployer, ltv_bps = policy.ltv_bps, "deployed collateralized loan contract");
        Self {
            address,
            ledger_id: ledger.id(),
            policy,
            loans: BTreeMap::new(),
            next_id: 0,
            executed: BTreeSet::new(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn policy(&self) -> &LoanPolicy {
        &self.policy
    }

    pub fn loan(&self, loan_id: LoanId) -> Option<&Loan> {
        self.loans.get(&loan_id)
    }

    pub fn loans(&self) -> impl Iterator<Item = &Loan> {
        self.loans.values()
    }

    pub fn loans_for<'a>(&'a self, account: &'a str, role: Role) -> impl Iterator<Item = &'a Loan> {
        self.loans
            .values()
            .filter(move |loan| loan.party(role).map(String::as_str) == Some(account))
    }

    pub fn repayment_amount(&self, loan_id: LoanId) -> Result<Amount, LoanError> {
        Ok(self.get(loan_id)?.repayment_amount)
    }

    /// A funded loan is overdue once the ledger clock is past its due time.
    pub fn is_overdue(&self, loan_id: LoanId, ledger: &LedgerState) -> Result<bool, LoanError> {
        let loan = self.get(loan_id)?;
        Ok(match (loan.state, loan.due_timestamp) {
            (LoanState::Funded, Some(due)) => ledger.now() > due,
            _ => false,
        })
    }

    fn require_ledger(&self, ledger: &LedgerState) -> Result<(), LoanError> {
        if ledger.id() != self.ledger_id {
            return Err(LoanError::WrongLedger {
                deployed_on: self.ledger_id,
                ledger: ledger.id(),
            });
        }
        Ok(())
    }

    fn get(&self, loan_id: LoanId) -> Result<&Loan, LoanError> {
        self.loans.get(&loan_id).ok_or(LoanError::NotFound { loan_id })
    }

    fn notify(&self, event: LoanEvent) -> LedgerMutation {
        LedgerMutation::Notify {
            contract: self.address.clone(),
            event,
        }
    }

    pub fn request_loan(
        &mut self,
        ledger: &mut LedgerState,
        borrower: &str,
        interest_rate_pct: u32,
        duration_secs: u64,
        collateral: Amount,
    ) -> Result<LoanId, LoanError> {
        self.try_request(ledger, borrower, interest_rate_pct, duration_secs, collateral)
            .inspect_err(|err| warn!(borrower, %err, "loan request rejected"))
    }

    fn try_request(
        &mut self,
        ledger: &mut LedgerState,
        borrower: &str,
        interest_rate_pct: u32,
        duration_secs: u64,
        collateral: Amount,
    ) -> Result<LoanId, LoanError> {
        self.require_ledger(ledger)?;
        let loan_amount = match self.policy.loan_amount(collateral) {
            Some(amount) if collateral > 0 && amount > 0 => amount,
            _ => return Err(LoanError::InvalidCollateral { collateral }),
        };
        let repayment_amount = LoanPolicy::repayment_amount(loan_amount, interest_rate_pct)
            .ok_or(LoanError::AmountOverflow)?;

        let loan_id = self.next_id;
        let now = ledger.now();
        ledger.apply_mutations(&[
            LedgerMutation::Lock {
                account: borrower.to_string(),
                amount: collateral,
            },
            self.notify(LoanEvent::LoanRequested {
                loan_id,
                borrower: borrower.to_string(),
                collateral_amount: collateral,
                loan_amount,
                interest_rate_pct,
                duration_secs,
            }),
        ])?;

        self.loans.insert(
            loan_id,
            Loan {
                id: loan_id,
                borrower: borrower.to_string(),
                lender: None,
                collateral_amount: collateral,
                loan_amount,
                repayment_amount,
                interest_rate_pct,
                duration_secs,
                created_at: now,
                funded_at: None,
                due_timestamp: None,
                settled_at: None,
                state: LoanState::Requested,
            },
        );
        self.next_id += 1;
        info!(loan_id, borrower, collateral, loan_amount, "loan requested");
        Ok(loan_id)
    }

    pub fn fund_loan(
        &mut self,
        ledger: &mut LedgerState,
        loan_id: LoanId,
        lender: &str,
        supplied: Amount,
    ) -> Result<(), LoanError> {
        self.try_fund(ledger, loan_id, lender, supplied)
            .inspect_err(|err| warn!(loan_id, lender, %err, "funding rejected"))
    }

    fn try_fund(
        &mut self,
        ledger: &mut LedgerState,
        loan_id: LoanId,
        lender: &str,
        supplied: Amount,
    ) -> Result<(), LoanError> {
        self.require_ledger(ledger)?;
        let loan = self.get(loan_id)?;
        match loan.state {
            LoanState::Requested => {}
            LoanState::Funded => return Err(LoanError::AlreadyFunded { loan_id }),
            state => return Err(LoanError::AlreadySettled { loan_id, state }),
        }
        if loan.borrower == lender {
            return Err(LoanError::Unauthorized {
                account: lender.to_string(),
                role: Role::Lender,
            });
        }
        if supplied != loan.loan_amount {
            return Err(LoanError::InvalidPayment {
                expected: loan.loan_amount,
                supplied,
            });
        }

        let now = ledger.now();
        let due = now.saturating_add(loan.duration_secs);
        let borrower = loan.borrower.clone();
        ledger.apply_mutations(&[
            LedgerMutation::Transfer {
                from: lender.to_string(),
                to: borrower,
                amount: supplied,
                memo: Some(format!("loan:{loan_id} funding")),
            },
            self.notify(LoanEvent::LoanFunded {
                loan_id,
                lender: lender.to_string(),
                amount: supplied,
                due_timestamp: due,
            }),
        ])?;

        if let Some(loan) = self.loans.get_mut(&loan_id) {
            loan.lender = Some(lender.to_string());
            loan.funded_at = Some(now);
            loan.due_timestamp = Some(due);
            loan.state = LoanState::Funded;
        }
        info!(loan_id, lender, due, "loan funded");
        Ok(())
    }

    pub fn repay_loan(
        &mut self,
        ledger: &mut LedgerState,
        loan_id: LoanId,
        borrower: &str,
        supplied: Amount,
    ) -> Result<(), LoanError> {
        self.try_repay(ledger, loan_id, borrower, supplied)
            .inspect_err(|err| warn!(loan_id, borrower, %err, "repayment rejected"))
    }

    fn try_repay(
        &mut self,
        ledger: &mut LedgerState,
        loan_id: LoanId,
        borrower: &str,
        supplied: Amount,
    ) -> Result<(), LoanError> {
        self.require_ledger(ledger)?;
        let loan = self.get(loan_id)?;
        let due = loan.require_funded()?;
        loan.require_party(Role::Borrower, borrower)?;
        let now = ledger.now();
        if now > due {
            return Err(LoanError::Overdue { due, now });
        }
        if supplied != loan.repayment_amount {
            return Err(LoanError::InvalidPayment {
                expected: loan.repayment_amount,
                supplied,
            });
        }
        let lender = loan.lender.clone().ok_or(LoanError::NotFunded { loan_id })?;

        ledger.apply_mutations(&[
            LedgerMutation::Transfer {
                from: borrower.to_string(),
                to: lender,
                amount: supplied,
                memo: Some(format!("loan:{loan_id} repayment")),
            },
            LedgerMutation::Release {
                account: borrower.to_string(),
                amount: loan.collateral_amount,
            },
            self.notify(LoanEvent::LoanRepaid {
                loan_id,
                borrower: borrower.to_string(),
                amount: supplied,
            }),
        ])?;

        if let Some(loan) = self.loans.get_mut(&loan_id) {
            loan.settled_at = Some(now);
            loan.state = LoanState::Repaid;
        }
        info!(loan_id, borrower, "loan repaid");
        Ok(())
    }

    pub fn claim_collateral(
        &mut self,
        ledger: &mut LedgerState,
        loan_id: LoanId,
        lender: &str,
    ) -> Result<(), LoanError> {
        self.try_claim(ledger, loan_id, lender)
            .inspect_err(|err| warn!(loan_id, lender, %err, "collateral claim rejected"))
    }

    fn try_claim(
        &mut self,
        ledger: &mut LedgerState,
        loan_id: LoanId,
        lender: &str,
    ) -> Result<(), LoanError> {
        self.require_ledger(ledger)?;
        let loan = self.get(loan_id)?;
        let due = loan.require_funded()?;
        loan.require_party(Role::Lender, lender)?;
        let now = ledger.now();
        if now <= due {
            return Err(LoanError::NotYetDue { due, now });
        }

        ledger.apply_mutations(&[
            LedgerMutation::Seize {
                from: loan.borrower.clone(),
                to: lender.to_string(),
                amount: loan.collateral_amount,
            },
            self.notify(LoanEvent::CollateralClaimed {
                loan_id,
                lender: lender.to_string(),
                amount: loan.collateral_amount,
            }),
        ])?;

        if let Some(loan) = self.loans.get_mut(&loan_id) {
            loan.settled_at = Some(now);
            loan.state = LoanState::Defaulted;
        }
        info!(loan_id, lender, "collateral claimed");
        Ok(())
    }

    /// Verifies a signed action and dispatches it on behalf of its signer.
    /// Returns the id of the loan the action touched.
    pub fn execute(
        &mut self,
        ledger: &mut LedgerState,
        signed: &SignedAction,
    ) -> Result<LoanId, LoanError> {
        if signed.contract != self.address {
            return Err(LoanError::WrongContract {
                contract: self.address.clone(),
                signed_for: signed.contract.clone(),
            });
        }
        let caller = signed.verify()?;
        let digest = signed.digest();
        if self.executed.contains(&digest) {
            return Err(LoanError::DuplicateAction);
        }
        debug!(%caller, action = ?signed.action, "executing signed action");

        let loan_id = match &signed.action {
            LoanAction::RequestLoan {
                interest_rate_pct,
                duration_secs,
                collateral,
            } => self.request_loan(ledger, &caller, *interest_rate_pct, *duration_secs, *collateral)?,
            LoanAction::FundLoan { loan_id, amount } => {
                self.fund_loan(ledger, *loan_id, &caller, *amount)?;
                *loan_id
            }
            LoanAction::RepayLoan { loan_id, amount } => {
                self.repay_loan(ledger, *loan_id, &caller, *amount)?;
                *loan_id
            }
            LoanAction::ClaimCollateral { loan_id } => {
                self.claim_collateral(ledger, *loan_id, &caller)?;
                *loan_id
            }
        };
        self.executed.insert(digest);
        Ok(loan_id)
    }
}
