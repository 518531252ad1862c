//! Output script variants.
//!
//! Scripts are a tagged enum over the three supported payment shapes rather
//! than free-form byte strings discriminated by prefix at every call site.
//! The serialized form is one tag byte followed by the payload, so adding a
//! new script type means adding a variant here and nowhere else.

use serde::{Deserialize, Serialize};

/// Tag byte for pay-to-pubkey-hash scripts.
const TAG_P2PKH: u8 = 0x01;
/// Tag byte for pay-to-script-hash scripts.
const TAG_P2SH: u8 = 0x02;
/// Tag byte for pay-to-witness-pubkey-hash scripts.
const TAG_P2WPKH: u8 = 0x03;

/// A payment script attached to a transaction input or output.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash,
    bincode::Encode, bincode::Decode,
)]
pub enum Script {
    /// Pay to pubkey hash: payload is the 20-byte pubkey digest.
    P2pkh(Vec<u8>),
    /// Pay to script hash: payload is the 20-byte script digest.
    P2sh(Vec<u8>),
    /// Pay to witness pubkey hash: payload is the witness program.
    P2wpkh(Vec<u8>),
}

impl Script {
    /// Parse a script from its tagged byte encoding.
    ///
    /// Returns `None` for an empty buffer or an unknown tag.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let (&tag, payload) = bytes.split_first()?;
        match tag {
            TAG_P2PKH => Some(Script::P2pkh(payload.to_vec())),
            TAG_P2SH => Some(Script::P2sh(payload.to_vec())),
            TAG_P2WPKH => Some(Script::P2wpkh(payload.to_vec())),
            _ => None,
        }
    }

    /// Tagged byte encoding: one tag byte followed by the payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let (tag, payload) = match self {
            Script::P2pkh(p) => (TAG_P2PKH, p),
            Script::P2sh(p) => (TAG_P2SH, p),
            Script::P2wpkh(p) => (TAG_P2WPKH, p),
        };
        let mut out = Vec::with_capacity(1 + payload.len());
        out.push(tag);
        out.extend_from_slice(payload);
        out
    }

    /// The script payload without the tag.
    pub fn payload(&self) -> &[u8] {
        match self {
            Script::P2pkh(p) | Script::P2sh(p) | Script::P2wpkh(p) => p,
        }
    }

    /// Human-readable kind name, used in logs and mempool introspection.
    pub fn kind(&self) -> &'static str {
        match self {
            Script::P2pkh(_) => "p2pkh",
            Script::P2sh(_) => "p2sh",
            Script::P2wpkh(_) => "p2wpkh",
        }
    }
}

impl Default for Script {
    fn default() -> Self {
        Script::P2pkh(Vec::new())
    }
}
