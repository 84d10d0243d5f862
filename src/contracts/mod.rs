mod loan;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::ledger::{AccountId, Amount, Timestamp};

pub use loan::{CollateralizedLoan, Loan, LoanError, LoanId, LoanState};

/// `0x` followed by 40 lowercase hex digits.
pub type ContractAddress = String;

/// Derives the address of a contract deployed by `deployer` with `nonce`.
pub fn derive_contract_address(deployer: &str, nonce: u64) -> ContractAddress {
    let mut hasher = Sha256::new();
    hasher.update(b"collateralized-loan");
    hasher.update(deployer.as_bytes());
    hasher.update(nonce.to_le_bytes());
    let digest = hasher.finalize();
    format!("0x{}", hex::encode(&digest[12..]))
}

pub fn is_valid_address(address: &str) -> bool {
    match address.strip_prefix("0x") {
        Some(body) => body.len() == 40 && body.bytes().all(|b| b.is_ascii_hexdigit()),
        None => false,
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoanPolicy {
    /// Share of the collateral advanced as the loan, in basis points.
    pub ltv_bps: u32,
}

impl Default for LoanPolicy {
    fn default() -> Self {
        Self { ltv_bps: 5_000 }
    }
}

impl LoanPolicy {
    pub fn loan_amount(&self, collateral: Amount) -> Option<Amount> {
        let amount = u128::from(collateral) * u128::from(self.ltv_bps) / 10_000;
        Amount::try_from(amount).ok()
    }

    /// Principal plus simple, single-period interest.
    pub fn repayment_amount(loan_amount: Amount, interest_rate_pct: u32) -> Option<Amount> {
        let interest = u128::from(loan_amount) * u128::from(interest_rate_pct) / 100;
        Amount::try_from(u128::from(loan_amount) + interest).ok()
    }
}

/// The party a loan action must come from.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Borrower,
    Lender,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Borrower => f.write_str("borrower"),
            Role::Lender => f.write_str("lender"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoanEvent {
    LoanRequested {
        loan_id: LoanId,
        borrower: AccountId,
        collateral_amount: Amount,
        loan_amount: Amount,
        interest_rate_pct: u32,
        duration_secs: u64,
    },
    LoanFunded {
        loan_id: LoanId,
        lender: AccountId,
        amount: Amount,
        due_timestamp: Timestamp,
    },
    LoanRepaid {
        loan_id: LoanId,
        borrower: AccountId,
        amount: Amount,
    },
    CollateralClaimed {
        loan_id: LoanId,
        lender: AccountId,
        amount: Amount,
    },
}

impl LoanEvent {
    pub fn loan_id(&self) -> LoanId {
        match self {
            LoanEvent::LoanRequested { loan_id, .. }
            | LoanEvent::LoanFunded { loan_id, .. }
            | LoanEvent::LoanRepaid { loan_id, .. }
            | LoanEvent::CollateralClaimed { loan_id, .. } => *loan_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            LoanEvent::LoanRequested { .. } => "LoanRequested",
            LoanEvent::LoanFunded { .. } => "LoanFunded",
            LoanEvent::LoanRepaid { .. } => "LoanRepaid",
            LoanEvent::CollateralClaimed { .. } => "CollateralClaimed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::parse_units;

    #[test]
    fn default_policy_lends_half_the_collateral() {
        let policy = LoanPolicy::default();
        let collateral = parse_units("1.0").unwrap();
        assert_eq!(policy.loan_amount(collateral), Some(parse_units("0.5").unwrap()));
    }

    #[test]
    fn repayment_adds_simple_interest() {
        let loan = parse_units("0.5").unwrap();
        assert_eq!(
            LoanPolicy::repayment_amount(loan, 10),
            Some(parse_units("0.55").unwrap())
        );
        assert_eq!(LoanPolicy::repayment_amount(loan, 0), Some(loan));
    }

    #[test]
    fn derived_addresses_are_well_formed_and_distinct() {
        let a = derive_contract_address("deployer", 0);
        let b = derive_contract_address("deployer", 1);
        assert!(is_valid_address(&a));
        assert!(is_valid_address(&b));
        assert_ne!(a, b);
        assert_eq!(a, derive_contract_address("deployer", 0));
    }

    #[test]
    fn address_validation_rejects_bad_shapes() {
        assert!(!is_valid_address("0x1234"));
        assert!(!is_valid_address(&"a".repeat(42)));
        assert!(!is_valid_address(&format!("0x{}", "g".repeat(40))));
    }
}
