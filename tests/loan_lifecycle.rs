//! End-to-end lifecycle of the collateralized loan contract, driven through
//! signed actions the way parties would submit them.

use rand::rngs::OsRng;

use collateral_loan::contracts::is_valid_address;
use collateral_loan::ledger::{parse_units, Amount, LedgerEvent};
use collateral_loan::signer::{LoanAction, Signer};
use collateral_loan::{CollateralizedLoan, LedgerState, LoanError, LoanEvent, LoanPolicy, LoanState};

const HOUR: u64 = 3_600;

struct Fixture {
    ledger: LedgerState,
    contract: CollateralizedLoan,
    borrower: Signer,
    lender: Signer,
    nonce: u64,
}

fn units(s: &str) -> Amount {
    parse_units(s).unwrap()
}

fn deploy_fixture() -> Fixture {
    let borrower = Signer::generate(&mut OsRng);
    let lender = Signer::generate(&mut OsRng);
    let mut ledger = LedgerState::new();
    ledger.mint(&borrower.address(), units("100"), "genesis").unwrap();
    ledger.mint(&lender.address(), units("100"), "genesis").unwrap();
    let contract = CollateralizedLoan::deploy(&mut ledger, "deployer", LoanPolicy::default());
    Fixture {
        ledger,
        contract,
        borrower,
        lender,
        nonce: 0,
    }
}

impl Fixture {
    fn as_borrower(&mut self, action: LoanAction) -> Result<u64, LoanError> {
        self.nonce += 1;
        let signed = self.borrower.sign(self.contract.address(), action, self.nonce);
        self.contract.execute(&mut self.ledger, &signed)
    }

    fn as_lender(&mut self, action: LoanAction) -> Result<u64, LoanError> {
        self.nonce += 1;
        let signed = self.lender.sign(self.contract.address(), action, self.nonce);
        self.contract.execute(&mut self.ledger, &signed)
    }

    fn request(&mut self) -> u64 {
        self.as_borrower(LoanAction::RequestLoan {
            interest_rate_pct: 10,
            duration_secs: HOUR,
            collateral: units("1.0"),
        })
        .unwrap()
    }

    fn fund(&mut self, loan_id: u64, amount: &str) -> Result<u64, LoanError> {
        self.as_lender(LoanAction::FundLoan {
            loan_id,
            amount: units(amount),
        })
    }

    fn repay(&mut self, loan_id: u64, amount: &str) -> Result<u64, LoanError> {
        self.as_borrower(LoanAction::RepayLoan {
            loan_id,
            amount: units(amount),
        })
    }

    fn claim(&mut self, loan_id: u64) -> Result<u64, LoanError> {
        self.as_lender(LoanAction::ClaimCollateral { loan_id })
    }

    fn loan_events(&self) -> Vec<LoanEvent> {
        self.ledger
            .events()
            .iter()
            .filter_map(|event| match event {
                LedgerEvent::Contract { contract, event } if contract == self.contract.address() => {
                    Some(event.clone())
                }
                _ => None,
            })
            .collect()
    }
}

#[test]
fn deploys_with_a_valid_address() {
    let fixture = deploy_fixture();
    assert!(is_valid_address(fixture.contract.address()));

    let mut ledger = LedgerState::new();
    let first = CollateralizedLoan::deploy(&mut ledger, "deployer", LoanPolicy::default());
    let second = CollateralizedLoan::deploy(&mut ledger, "deployer", LoanPolicy::default());
    assert_ne!(first.address(), second.address());
}

#[test]
fn borrower_requests_a_loan_by_providing_collateral() {
    let mut f = deploy_fixture();
    let id = f.request();
    match f.loan_events().as_slice() {
        [LoanEvent::LoanRequested {
            loan_id,
            borrower,
            collateral_amount,
            ..
        }] => {
            assert_eq!(*loan_id, id);
            assert_eq!(*borrower, f.borrower.address());
            assert_eq!(*collateral_amount, units("1.0"));
        }
        other => panic!("expected LoanRequested, got {other:?}"),
    }
}

#[test]
fn lender_funds_a_requested_loan() {
    let mut f = deploy_fixture();
    let id = f.request();
    f.fund(id, "0.5").unwrap();
    assert!(matches!(
        f.loan_events().last(),
        Some(LoanEvent::LoanFunded { lender, .. }) if *lender == f.lender.address()
    ));
}

#[test]
fn funding_with_incorrect_amount_is_rejected() {
    let mut f = deploy_fixture();
    let id = f.request();
    assert!(matches!(
        f.fund(id, "0.4"),
        Err(LoanError::InvalidPayment { .. })
    ));
    assert_eq!(f.contract.loan(id).unwrap().state, LoanState::Requested);
}

#[test]
fn borrower_repays_the_loan_fully() {
    let mut f = deploy_fixture();
    let id = f.request();
    f.fund(id, "0.5").unwrap();
    f.repay(id, "0.55").unwrap();
    assert!(matches!(f.loan_events().last(), Some(LoanEvent::LoanRepaid { .. })));
    assert_eq!(f.contract.loan(id).unwrap().state, LoanState::Repaid);
    assert_eq!(f.ledger.balance(&f.borrower.address()).locked, 0);
}

#[test]
fn repayment_with_incorrect_amount_is_rejected() {
    let mut f = deploy_fixture();
    let id = f.request();
    f.fund(id, "0.5").unwrap();
    assert!(matches!(
        f.repay(id, "0.53"),
        Err(LoanError::InvalidPayment { .. })
    ));
    assert_eq!(f.contract.loan(id).unwrap().state, LoanState::Funded);
}

#[test]
fn lender_claims_collateral_of_an_overdue_loan() {
    let mut f = deploy_fixture();
    let id = f.request();
    f.fund(id, "0.5").unwrap();
    f.ledger.advance_time(HOUR + 1).unwrap();
    f.claim(id).unwrap();
    assert!(matches!(
        f.loan_events().last(),
        Some(LoanEvent::CollateralClaimed { loan_id: 0, .. })
    ));
    assert_eq!(f.contract.loan(id).unwrap().state, LoanState::Defaulted);
    assert_eq!(
        f.ledger.balance(&f.lender.address()).available,
        units("100.5")
    );
}

#[test]
fn collateral_of_a_repaid_loan_cannot_be_claimed() {
    let mut f = deploy_fixture();
    let id = f.request();
    f.fund(id, "0.5").unwrap();
    f.repay(id, "0.55").unwrap();
    f.ledger.advance_time(HOUR + 1).unwrap();
    assert!(matches!(f.claim(id), Err(LoanError::AlreadySettled { .. })));
}

#[test]
fn collateral_cannot_be_claimed_before_the_deadline() {
    let mut f = deploy_fixture();
    let id = f.request();
    f.fund(id, "0.5").unwrap();
    f.ledger.advance_time(HOUR - 1).unwrap();
    assert!(matches!(f.claim(id), Err(LoanError::NotYetDue { .. })));
}

#[test]
fn subscribers_see_each_transition_once() {
    let mut f = deploy_fixture();
    let mut cursor = f.ledger.subscribe();
    let id = f.request();
    f.fund(id, "0.5").unwrap();
    f.repay(id, "0.55").unwrap();

    let names: Vec<&str> = f
        .ledger
        .poll(&mut cursor)
        .iter()
        .filter_map(|event| match event {
            LedgerEvent::Contract { event, .. } => Some(event.name()),
            _ => None,
        })
        .collect();
    assert_eq!(names, vec!["LoanRequested", "LoanFunded", "LoanRepaid"]);
    assert!(f.ledger.poll(&mut cursor).is_empty());
}
