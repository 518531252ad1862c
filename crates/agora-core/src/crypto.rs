//! Hybrid signatures and address derivation.
//!
//! [`HybridKeyManager`] implements the [`KeyManager`](crate::traits::KeyManager)
//! seam with Ed25519 as the classical half. Signatures travel in a
//! length-prefixed frame, `len(u16 BE) ‖ classical ‖ post-quantum`, so a
//! PQ suffix can be appended without touching any verification call site.
//! The PQ half is pluggable and empty in this build; verification of the
//! frame succeeds when every present half verifies.
//!
//! Addresses commit to the SHA3-256 digest of the public key:
//! `base58(version ‖ digest[..20] ‖ checksum[..4])` with the checksum taken
//! from SHA3-256 over the version and digest bytes.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use sha3::{Digest, Sha3_256};

use crate::error::{AddressError, CryptoError};
use crate::traits::KeyManager;

/// Address version byte for pay-to-pubkey-hash addresses.
const ADDRESS_VERSION: u8 = 0x26;

/// Bytes of the pubkey digest committed to by an address.
const ADDRESS_HASH_LEN: usize = 20;

/// Bytes of checksum appended to the address payload.
const CHECKSUM_LEN: usize = 4;

/// Ed25519 signature length (the classical frame half).
const CLASSICAL_SIG_LEN: usize = 64;

fn checksum(payload: &[u8]) -> [u8; CHECKSUM_LEN] {
    let digest = Sha3_256::digest(payload);
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&digest[..CHECKSUM_LEN]);
    out
}

/// Key manager backed by an Ed25519 keypair.
pub struct HybridKeyManager {
    signing_key: SigningKey,
}

impl HybridKeyManager {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Construct from raw secret key bytes.
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(bytes),
        }
    }

    /// This manager's public key bytes.
    pub fn public_key(&self) -> Vec<u8> {
        self.signing_key.verifying_key().to_bytes().to_vec()
    }

    /// This manager's own address.
    pub fn address(&self) -> Result<String, AddressError> {
        self.derive_address(&self.public_key())
    }

    /// Frame a classical signature: `len(u16 BE) ‖ classical ‖ pq-suffix`.
    fn frame(classical: &[u8], pq: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + classical.len() + pq.len());
        out.extend_from_slice(&(classical.len() as u16).to_be_bytes());
        out.extend_from_slice(classical);
        out.extend_from_slice(pq);
        out
    }

    /// Split a framed signature into its classical and PQ halves.
    fn unframe(signature: &[u8]) -> Result<(&[u8], &[u8]), CryptoError> {
        if signature.len() < 2 {
            return Err(CryptoError::MalformedHybridFrame);
        }
        let len = u16::from_be_bytes([signature[0], signature[1]]) as usize;
        if signature.len() < 2 + len {
            return Err(CryptoError::MalformedHybridFrame);
        }
        Ok((&signature[2..2 + len], &signature[2 + len..]))
    }
}

impl KeyManager for HybridKeyManager {
    fn derive_address(&self, public_key: &[u8]) -> Result<String, AddressError> {
        if public_key.is_empty() {
            return Err(AddressError::InvalidLength);
        }
        let digest = Sha3_256::digest(public_key);

        let mut payload = Vec::with_capacity(1 + ADDRESS_HASH_LEN + CHECKSUM_LEN);
        payload.push(ADDRESS_VERSION);
        payload.extend_from_slice(&digest[..ADDRESS_HASH_LEN]);
        let check = checksum(&payload);
        payload.extend_from_slice(&check);

        Ok(bs58::encode(payload).into_string())
    }

    fn address_to_hash(&self, address: &str) -> Result<Vec<u8>, AddressError> {
        let payload = bs58::decode(address)
            .into_vec()
            .map_err(|e| AddressError::InvalidBase58(e.to_string()))?;

        if payload.len() != 1 + ADDRESS_HASH_LEN + CHECKSUM_LEN {
            return Err(AddressError::InvalidLength);
        }
        if payload[0] != ADDRESS_VERSION {
            return Err(AddressError::InvalidVersion(payload[0]));
        }

        let (body, check) = payload.split_at(1 + ADDRESS_HASH_LEN);
        if checksum(body) != check {
            return Err(AddressError::InvalidChecksum);
        }

        Ok(body[1..].to_vec())
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let classical = self.signing_key.sign(message);
        Ok(Self::frame(&classical.to_bytes(), &[]))
    }

    fn verify(
        &self,
        message: &[u8],
        signature: &[u8],
        public_key: &[u8],
    ) -> Result<bool, CryptoError> {
        let (classical, _pq) = Self::unframe(signature)?;
        if classical.len() != CLASSICAL_SIG_LEN {
            return Err(CryptoError::InvalidSignature);
        }

        let key_bytes: [u8; 32] = public_key
            .try_into()
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        let verifying_key =
            VerifyingKey::from_bytes(&key_bytes).map_err(|_| CryptoError::InvalidPublicKey)?;

        let sig_bytes: [u8; CLASSICAL_SIG_LEN] = classical
            .try_into()
            .map_err(|_| CryptoError::InvalidSignature)?;
        let sig = Signature::from_bytes(&sig_bytes);

        Ok(verifying_key.verify(message, &sig).is_ok())
    }
}
