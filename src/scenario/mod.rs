//! Scripted sessions against a freshly deployed contract.
//!
//! A script is a JSON array of [`Step`]s. Each step runs as one action on the
//! ledger; failures are recorded in the outcome and the script continues.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{ConfigError, LoanConfig};
use crate::contracts::{CollateralizedLoan, LoanError, LoanId};
use crate::ledger::{parse_units, AccountId, LedgerEvent, LedgerSnapshot, LedgerState};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Step {
    Mint {
        account: AccountId,
        amount: String,
    },
    RequestLoan {
        borrower: AccountId,
        collateral: String,
        #[serde(default)]
        interest_rate_pct: Option<u32>,
        #[serde(default)]
        duration_secs: Option<u64>,
    },
    FundLoan {
        lender: AccountId,
        loan_id: LoanId,
        amount: String,
    },
    RepayLoan {
        borrower: AccountId,
        loan_id: LoanId,
        amount: String,
    },
    ClaimCollateral {
        lender: AccountId,
        loan_id: LoanId,
    },
    AdvanceTime {
        secs: u64,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepOutcome {
    pub index: usize,
    pub step: Step,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loan_id: Option<LoanId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub events: Vec<LedgerEvent>,
}

pub struct Session {
    pub ledger: LedgerState,
    pub contract: CollateralizedLoan,
    default_interest_rate_pct: u32,
    default_duration_secs: u64,
    executed: usize,
}

impl Session {
    pub fn new(config: &LoanConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut ledger = config.build_ledger()?;
        let contract =
            CollateralizedLoan::deploy(&mut ledger, &config.genesis.deployer, config.loan_policy());
        Ok(Self {
            ledger,
            contract,
            default_interest_rate_pct: config.policy.default_interest_rate_pct,
            default_duration_secs: config.policy.default_duration_secs,
            executed: 0,
        })
    }

    pub fn run(&mut self, steps: &[Step]) -> Vec<StepOutcome> {
        steps.iter().map(|step| self.run_step(step)).collect()
    }

    pub fn run_step(&mut self, step: &Step) -> StepOutcome {
        let index = self.executed;
        self.executed += 1;
        let mut cursor = self.ledger.subscribe();
        let result = self.apply(step);
        debug!(index, ok = result.is_ok(), "scenario step");
        let events = self.ledger.poll(&mut cursor).to_vec();
        let (loan_id, error) = match result {
            Ok(loan_id) => (loan_id, None),
            Err(err) => (None, Some(err.to_string())),
        };
        StepOutcome {
            index,
            step: step.clone(),
            ok: error.is_none(),
            loan_id,
            error,
            events,
        }
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        self.ledger.snapshot()
    }

    fn apply(&mut self, step: &Step) -> Result<Option<LoanId>, LoanError> {
        match step {
            Step::Mint { account, amount } => {
                self.ledger.mint(account, parse_units(amount)?, "script")?;
                Ok(None)
            }
            Step::RequestLoan {
                borrower,
                collateral,
                interest_rate_pct,
                duration_secs,
            } => {
                let id = self.contract.request_loan(
                    &mut self.ledger,
                    borrower,
                    interest_rate_pct.unwrap_or(self.default_interest_rate_pct),
                    duration_secs.unwrap_or(self.default_duration_secs),
                    parse_units(collateral)?,
                )?;
                Ok(Some(id))
            }
            Step::FundLoan {
                lender,
                loan_id,
                amount,
            } => {
                self.contract
                    .fund_loan(&mut self.ledger, *loan_id, lender, parse_units(amount)?)?;
                Ok(Some(*loan_id))
            }
            Step::RepayLoan {
                borrower,
                loan_id,
                amount,
            } => {
                self.contract
                    .repay_loan(&mut self.ledger, *loan_id, borrower, parse_units(amount)?)?;
                Ok(Some(*loan_id))
            }
            Step::ClaimCollateral { lender, loan_id } => {
                self.contract
                    .claim_collateral(&mut self.ledger, *loan_id, lender)?;
                Ok(Some(*loan_id))
            }
            Step::AdvanceTime { secs } => {
                self.ledger.advance_time(*secs)?;
                Ok(None)
            }
        }
    }
}

/// The reference walk-through: one loan repaid on time, one defaulted.
pub fn reference_scenario() -> Vec<Step> {
    let request = || Step::RequestLoan {
        borrower: "borrower".into(),
        collateral: "1.0".into(),
        interest_rate_pct: Some(10),
        duration_secs: Some(3_600),
    };
    let fund = |loan_id, amount: &str| Step::FundLoan {
        lender: "lender".into(),
        loan_id,
        amount: amount.into(),
    };
    let repay = |amount: &str| Step::RepayLoan {
        borrower: "borrower".into(),
        loan_id: 0,
        amount: amount.into(),
    };
    let claim = |loan_id| Step::ClaimCollateral {
        lender: "lender".into(),
        loan_id,
    };
    vec![
        request(),
        fund(0, "0.4"),
        fund(0, "0.5"),
        repay("0.53"),
        repay("0.55"),
        claim(0),
        request(),
        fund(1, "0.5"),
        claim(1),
        Step::AdvanceTime { secs: 3_601 },
        claim(1),
    ]
}
