//! Party identities and signed loan actions.
//!
//! A party is an ed25519 key pair; its ledger account is the address derived
//! from the verifying key. Actions travel as [`SignedAction`]s and the caller
//! is whatever address the signature proves.

use ed25519_dalek::{Signature, Signer as _, SigningKey, VerifyingKey};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::contracts::{ContractAddress, LoanId};
use crate::ledger::{AccountId, Amount};

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("malformed public key")]
    MalformedKey,
    #[error("malformed signature")]
    MalformedSignature,
    #[error("signature does not match action")]
    InvalidSignature,
    #[error("invalid secret key hex: {0}")]
    InvalidSecret(String),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoanAction {
    RequestLoan {
        interest_rate_pct: u32,
        duration_secs: u64,
        collateral: Amount,
    },
    FundLoan {
        loan_id: LoanId,
        amount: Amount,
    },
    RepayLoan {
        loan_id: LoanId,
        amount: Amount,
    },
    ClaimCollateral {
        loan_id: LoanId,
    },
}

/// `0x` + the last 20 bytes of SHA-256 over the verifying key.
pub fn address_of(key: &VerifyingKey) -> AccountId {
    let digest = Sha256::digest(key.as_bytes());
    format!("0x{}", hex::encode(&digest[12..]))
}

pub struct Signer {
    key: SigningKey,
}

impl Signer {
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self {
            key: SigningKey::generate(rng),
        }
    }

    pub fn from_secret_hex(sk_hex: &str) -> Result<Self, SignatureError> {
        let bytes = hex::decode(sk_hex.trim())
            .map_err(|e| SignatureError::InvalidSecret(e.to_string()))?;
        let secret: [u8; 32] = bytes
            .try_into()
            .map_err(|_| SignatureError::InvalidSecret("expected 32 bytes".into()))?;
        Ok(Self {
            key: SigningKey::from_bytes(&secret),
        })
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.key.to_bytes())
    }

    pub fn public_hex(&self) -> String {
        hex::encode(self.key.verifying_key().as_bytes())
    }

    pub fn address(&self) -> AccountId {
        address_of(&self.key.verifying_key())
    }

    /// Signs `action` for the contract at `contract`. `nonce` distinguishes
    /// otherwise identical actions.
    pub fn sign(&self, contract: &str, action: LoanAction, nonce: u64) -> SignedAction {
        let digest = action_digest(contract, &action, nonce);
        let signature = self.key.sign(&digest);
        SignedAction {
            contract: contract.to_string(),
            action,
            nonce,
            public_key: self.key.verifying_key().as_bytes().to_vec(),
            signature: signature.to_bytes().to_vec(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignedAction {
    pub contract: ContractAddress,
    pub action: LoanAction,
    pub nonce: u64,
    #[serde(with = "serde_bytes")]
    pub public_key: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
}

impl SignedAction {
    pub fn digest(&self) -> [u8; 32] {
        action_digest(&self.contract, &self.action, self.nonce)
    }

    /// Checks the signature and returns the signer's address.
    pub fn verify(&self) -> Result<AccountId, SignatureError> {
        let key_bytes: [u8; 32] = self
            .public_key
            .as_slice()
            .try_into()
            .map_err(|_| SignatureError::MalformedKey)?;
        let key = VerifyingKey::from_bytes(&key_bytes).map_err(|_| SignatureError::MalformedKey)?;
        let signature = Signature::from_slice(&self.signature)
            .map_err(|_| SignatureError::MalformedSignature)?;
        key.verify_strict(&self.digest(), &signature)
            .map_err(|_| SignatureError::InvalidSignature)?;
        Ok(address_of(&key))
    }
}

fn action_digest(contract: &str, action: &LoanAction, nonce: u64) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"loan-action");
    hasher.update((contract.len() as u64).to_le_bytes());
    hasher.update(contract.as_bytes());
    hasher.update(nonce.to_le_bytes());
    match action {
        LoanAction::RequestLoan {
            interest_rate_pct,
            duration_secs,
            collateral,
        } => {
            hasher.update([0u8]);
            hasher.update(interest_rate_pct.to_le_bytes());
            hasher.update(duration_secs.to_le_bytes());
            hasher.update(collateral.to_le_bytes());
        }
        LoanAction::FundLoan { loan_id, amount } => {
            hasher.update([1u8]);
            hasher.update(loan_id.to_le_bytes());
            hasher.update(amount.to_le_bytes());
        }
        LoanAction::RepayLoan { loan_id, amount } => {
            hasher.update([2u8]);
            hasher.update(loan_id.to_le_bytes());
            hasher.update(amount.to_le_bytes());
        }
        LoanAction::ClaimCollateral { loan_id } => {
            hasher.update([3u8]);
            hasher.update(loan_id.to_le_bytes());
        }
    }
    hasher.finalize().into()
}

pub(crate) mod serde_bytes {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        hex::decode(&encoded).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rand::rngs::OsRng;

    use crate::contracts::{CollateralizedLoan, LoanError, LoanPolicy, LoanState};
    use crate::ledger::{parse_units, LedgerState};

    const CONTRACT: &str = "0x00000000000000000000000000000000000000aa";

    #[test]
    fn signed_action_verifies_to_signer_address() {
        let signer = Signer::generate(&mut OsRng);
        let signed = signer.sign(CONTRACT, LoanAction::ClaimCollateral { loan_id: 3 }, 0);
        assert_eq!(signed.verify().unwrap(), signer.address());
        assert!(crate::contracts::is_valid_address(&signer.address()));
    }

    #[test]
    fn tampered_action_fails_verification() {
        let signer = Signer::generate(&mut OsRng);
        let mut signed = signer.sign(
            CONTRACT,
            LoanAction::FundLoan {
                loan_id: 0,
                amount: 50,
            },
            0,
        );
        signed.action = LoanAction::FundLoan {
            loan_id: 0,
            amount: 49,
        };
        assert_eq!(signed.verify(), Err(SignatureError::InvalidSignature));

        signed.signature.truncate(10);
        assert_eq!(signed.verify(), Err(SignatureError::MalformedSignature));
    }

    #[test]
    fn retargeted_contract_fails_verification() {
        let signer = Signer::generate(&mut OsRng);
        let mut signed = signer.sign(CONTRACT, LoanAction::ClaimCollateral { loan_id: 0 }, 0);
        signed.contract = "0x00000000000000000000000000000000000000bb".into();
        assert_eq!(signed.verify(), Err(SignatureError::InvalidSignature));
    }

    #[test]
    fn signed_action_survives_json() {
        let signer = Signer::generate(&mut OsRng);
        let signed = signer.sign(CONTRACT, LoanAction::ClaimCollateral { loan_id: 1 }, 9);
        let json = serde_json::to_string(&signed).unwrap();
        let back: SignedAction = serde_json::from_str(&json).unwrap();
        assert_eq!(back.verify().unwrap(), signer.address());
    }

    #[test]
    fn secret_hex_restores_the_same_identity() {
        let signer = Signer::generate(&mut OsRng);
        let restored = Signer::from_secret_hex(&signer.secret_hex()).unwrap();
        assert_eq!(restored.address(), signer.address());
        assert!(Signer::from_secret_hex("abcd").is_err());
    }

    #[test]
    fn contract_executes_signed_actions_as_their_signer() {
        let borrower = Signer::generate(&mut OsRng);
        let lender = Signer::generate(&mut OsRng);
        let mut ledger = LedgerState::new();
        ledger.mint(&borrower.address(), parse_units("5").unwrap(), "genesis").unwrap();
        ledger.mint(&lender.address(), parse_units("5").unwrap(), "genesis").unwrap();
        let mut contract = CollateralizedLoan::deploy(&mut ledger, "deployer", LoanPolicy::default());

        let request = borrower.sign(
            contract.address(),
            LoanAction::RequestLoan {
                interest_rate_pct: 10,
                duration_secs: 3_600,
                collateral: parse_units("1.0").unwrap(),
            },
            0,
        );
        let id = contract.execute(&mut ledger, &request).unwrap();
        assert_eq!(
            contract.execute(&mut ledger, &request),
            Err(LoanError::DuplicateAction)
        );

        let fund = lender.sign(
            contract.address(),
            LoanAction::FundLoan {
                loan_id: id,
                amount: parse_units("0.5").unwrap(),
            },
            0,
        );
        contract.execute(&mut ledger, &fund).unwrap();
        let loan = contract.loan(id).unwrap();
        assert_eq!(loan.state, LoanState::Funded);
        assert_eq!(loan.lender, Some(lender.address()));
        assert_eq!(loan.borrower, borrower.address());
    }

    #[test]
    fn action_signed_for_one_contract_cannot_run_on_another() {
        let borrower = Signer::generate(&mut OsRng);
        let mut ledger = LedgerState::new();
        ledger.mint(&borrower.address(), parse_units("5").unwrap(), "genesis").unwrap();
        let mut first = CollateralizedLoan::deploy(&mut ledger, "deployer", LoanPolicy::default());
        let mut second = CollateralizedLoan::deploy(&mut ledger, "deployer", LoanPolicy::default());

        let request = borrower.sign(
            first.address(),
            LoanAction::RequestLoan {
                interest_rate_pct: 10,
                duration_secs: 3_600,
                collateral: parse_units("1.0").unwrap(),
            },
            0,
        );
        first.execute(&mut ledger, &request).unwrap();
        assert_eq!(
            second.execute(&mut ledger, &request),
            Err(LoanError::WrongContract {
                contract: second.address().to_string(),
                signed_for: first.address().to_string(),
            })
        );
        assert_eq!(second.loans().count(), 0);
        assert_eq!(
            ledger.balance(&borrower.address()).locked,
            parse_units("1.0").unwrap()
        );
    }
}
