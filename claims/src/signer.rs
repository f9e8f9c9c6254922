use k256::ecdsa::SigningKey;
use sha3::{Digest, Keccak256};

use crate::customer::normalize_email;
use crate::error::ClaimError;

const ETH_MESSAGE_PREFIX: &[u8] = b"\x19Ethereum Signed Message:\n32";

/// Off-chain oracle signer. Produces an ECDSA signature over the packed
/// hash of (recipient, email hash, reward amount, contract address) that
/// the on-chain verifier checks before releasing funds. The byte encoding
/// here must match the contract's `abi.encodePacked` exactly.
pub struct RewardSigner {
    key: SigningKey,
    contract: [u8; 20],
}

/// A signed claim authorization plus the signer address the client can use
/// to verify recovery before submitting on-chain.
#[derive(Clone, Debug)]
pub struct ClaimSignature {
    pub signature: String,
    pub signer: String,
    pub amount: u64,
}

impl RewardSigner {
    pub fn new(private_key_hex: &str, contract_address: &str) -> Result<Self, ClaimError> {
        let stripped = private_key_hex.trim().trim_start_matches("0x");
        let raw = hex::decode(stripped)
            .map_err(|_| ClaimError::Config("signer key must be hex-encoded"))?;
        let key = SigningKey::from_slice(&raw)
            .map_err(|_| ClaimError::Config("signer key is not a valid secp256k1 scalar"))?;
        let contract = parse_address(contract_address)
            .map_err(|_| ClaimError::Config("invalid reward contract address"))?;
        Ok(Self { key, contract })
    }

    /// Ethereum address of the configured signer, EIP-55 encoded.
    pub fn signer_address(&self) -> String {
        let point = self.key.verifying_key().to_encoded_point(false);
        let digest = keccak256(&point.as_bytes()[1..]);
        let mut addr = [0u8; 20];
        addr.copy_from_slice(&digest[12..]);
        to_checksum_address(&addr)
    }

    /// Signs the claim authorization for `amount` USDC minor units to
    /// `recipient`. Deterministic: identical inputs always yield the same
    /// signature (RFC 6979 nonces).
    pub fn sign(
        &self,
        recipient: &str,
        email_hash: [u8; 32],
        amount: u64,
    ) -> Result<ClaimSignature, ClaimError> {
        let recipient = parse_address(recipient)?;
        let message = message_hash(&recipient, &email_hash, amount, &self.contract);
        let digest = signed_message_digest(&message);
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(&digest)
            .map_err(|err| ClaimError::Serialization(err.to_string()))?;

        let mut sig_bytes = [0u8; 65];
        sig_bytes[..64].copy_from_slice(&signature.to_bytes());
        sig_bytes[64] = 27 + recovery_id.to_byte();

        Ok(ClaimSignature {
            signature: format!("0x{}", hex::encode(sig_bytes)),
            signer: self.signer_address(),
            amount,
        })
    }
}

/// keccak256(abi.encodePacked(recipient, emailHash, uint256(amount), contract)).
pub fn message_hash(
    recipient: &[u8; 20],
    email_hash: &[u8; 32],
    amount: u64,
    contract: &[u8; 20],
) -> [u8; 32] {
    let mut amount_word = [0u8; 32];
    amount_word[24..].copy_from_slice(&amount.to_be_bytes());

    let mut hasher = Keccak256::new();
    hasher.update(recipient);
    hasher.update(email_hash);
    hasher.update(amount_word);
    hasher.update(contract);
    hasher.finalize().into()
}

/// Applies the `personal_sign` prefix the on-chain ECDSA library expects.
pub fn signed_message_digest(message: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(ETH_MESSAGE_PREFIX);
    hasher.update(message);
    hasher.finalize().into()
}

/// keccak256 of the normalized (lowercased, trimmed) email bytes.
pub fn email_hash(email: &str) -> [u8; 32] {
    keccak256(normalize_email(email).as_bytes())
}

/// Parses a 0x-prefixed Ethereum address. All-lowercase (and all-uppercase)
/// hex is accepted as-is; mixed-case input must carry a valid EIP-55
/// checksum.
pub fn parse_address(raw: &str) -> Result<[u8; 20], ClaimError> {
    let trimmed = raw.trim();
    let hex_part = trimmed
        .strip_prefix("0x")
        .ok_or(ClaimError::InvalidInput("address must be 0x-prefixed"))?;
    if hex_part.len() != 40 {
        return Err(ClaimError::InvalidInput("address must be 20 bytes"));
    }
    let decoded = hex::decode(hex_part.to_lowercase())
        .map_err(|_| ClaimError::InvalidInput("address is not valid hex"))?;
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&decoded);

    let has_upper = hex_part.chars().any(|c| c.is_ascii_uppercase());
    let has_lower = hex_part.chars().any(|c| c.is_ascii_lowercase());
    if has_upper && has_lower && to_checksum_address(&bytes) != format!("0x{hex_part}") {
        return Err(ClaimError::InvalidInput("address checksum mismatch"));
    }
    Ok(bytes)
}

/// EIP-55 mixed-case encoding.
pub fn to_checksum_address(address: &[u8; 20]) -> String {
    let lower = hex::encode(address);
    let digest = keccak256(lower.as_bytes());
    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for (i, c) in lower.chars().enumerate() {
        let nibble = (digest[i / 2] >> (4 * (1 - i % 2))) & 0x0f;
        if c.is_ascii_alphabetic() && nibble >= 8 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}

fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}
