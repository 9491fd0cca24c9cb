//! Payment confirmation signature verification.
//!
//! The processor signs `"{order_id}|{payment_id}"` with HMAC-SHA256 under the
//! merchant secret and hands the hex digest to the client. A confirmation is
//! only ever trusted if that digest checks out; HTTP status codes or client
//! claims are never treated as proof of payment.

use common::{OrderId, PaymentId};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Result of checking a claimed signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Valid,
    Invalid,
}

impl Verdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, Verdict::Valid)
    }
}

/// Verifies processor signatures against the shared secret.
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: SecretString,
}

impl SignatureVerifier {
    pub fn new(secret: SecretString) -> Self {
        Self { secret }
    }

    fn digest(&self, order_id: &str, payment_id: &str) -> Vec<u8> {
        // HMAC accepts keys of any length, so this cannot fail.
        let mut mac = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(order_id.as_bytes());
        mac.update(b"|");
        mac.update(payment_id.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }

    /// Checks `claimed` (lowercase or uppercase hex) in constant time.
    pub fn verify(&self, order_id: &OrderId, payment_id: &PaymentId, claimed: &str) -> Verdict {
        let Some(provided) = hex::decode(claimed).ok() else {
            return Verdict::Invalid;
        };
        let expected = self.digest(order_id.as_str(), payment_id.as_str());

        if expected.ct_eq(&provided).unwrap_u8() == 1 {
            Verdict::Valid
        } else {
            Verdict::Invalid
        }
    }

    /// Produces the hex signature the processor would issue.
    pub fn sign(&self, order_id: &OrderId, payment_id: &PaymentId) -> String {
        hex::encode(self.digest(order_id.as_str(), payment_id.as_str()))
    }
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier").finish_non_exhaustive()
    }
}
