//! Request signing for trusted v5 clients.
//!
//! The verification key is derived from the machine identifier by hashing it,
//! scrambling the digest in place with a fixed client constant, and hashing the
//! result again. Each request then carries a random salt (`ss`) and the digest
//! (`sh`) of the encoded arguments joined with the key.

use md5::{Digest, Md5};

use crate::transport::args::TransactionArgs;

const TRUSTED_CLIENT_CONSTANT: u16 = 17737;
const UNTRUSTED_SALT: &str = "19191919";
const UNTRUSTED_HASH: &str = "ABCDABCDABCDABCDABCDABCDABCDABCD";

/// Whether requests carry a real signature or the fixed untrusted pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SigningMode {
    #[default]
    Signed,
    UntrustedClient,
}

/// Final query string plus the values that were appended to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedQuery {
    pub query: String,
    pub salt: String,
    pub signature: String,
}

pub fn verification_key(guid: &str) -> String {
    let mut key = [0u8; 16];
    key.copy_from_slice(&Md5::digest(guid.as_bytes()));
    let [low, high] = TRUSTED_CLIENT_CONSTANT.to_le_bytes();
    for i in 0..key.len() {
        let j = usize::from((key[i] ^ low) % 16);
        let scramble = key[j] ^ high;
        key[i] ^= scramble;
    }
    hex::encode_upper(Md5::digest(key))
}

/// Appends the salt and signature to `args`.
///
/// Deterministic in `(guid, salt, args)`; the caller supplies the salt.
pub fn sign(guid: &str, salt: u16, args: &TransactionArgs) -> SignedQuery {
    let salt = salt.to_string();
    let salted = args.clone().with("ss", &salt).encode();
    let hashed = format!("{salted}&{}", verification_key(guid));
    let signature = hex::encode_upper(Md5::digest(hashed.as_bytes()));
    SignedQuery {
        query: format!("{salted}&sh={signature}"),
        salt,
        signature,
    }
}

pub fn untrusted(args: &TransactionArgs) -> SignedQuery {
    let query = args
        .clone()
        .with("ss", UNTRUSTED_SALT)
        .with("sh", UNTRUSTED_HASH)
        .encode();
    SignedQuery {
        query,
        salt: UNTRUSTED_SALT.to_owned(),
        signature: UNTRUSTED_HASH.to_owned(),
    }
}
