//! Wire protocol: tagged message envelopes over length-prefixed JSON
//! frames.
//!
//! Every message travels as `{"type": ..., "data": ...}`; the frame is a
//! 4-byte big-endian length followed by the JSON body. Frames above
//! [`MAX_MESSAGE_SIZE`] are rejected before the body is read so a peer
//! cannot make us allocate unbounded memory.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use agora_core::error::NetworkError;
use agora_core::types::{Block, Transaction};

/// Upper bound on a serialized wire message.
pub const MAX_MESSAGE_SIZE: usize = 2 * 1024 * 1024;

/// Handshake payload.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct VersionPayload {
    pub version: u32,
    /// Service bitfield: bit 0 network, bit 1 voting, bit 2 miner.
    pub services: u64,
    /// Sender's best chain height.
    pub height: u64,
    /// Hex-encoded public key.
    pub public_key: String,
    /// Hex-encoded signature over the handshake fields.
    pub signature: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    pub miner: bool,
    /// Voting participation summary.
    pub vote_stats: VoteStats,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct VoteStats {
    pub votes_cast: u64,
    pub last_vote_height: Option<u64>,
}

/// A peer address advertisement.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PeerAddress {
    pub address: String,
    pub services: u64,
    pub last_seen_ms: u64,
}

/// What an inventory item refers to.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InvType {
    Block,
    Tx,
}

/// One inventory announcement or request entry.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct InvItem {
    #[serde(rename = "type")]
    pub kind: InvType,
    /// Lowercase hex hash.
    pub hash: String,
}

/// The tagged peer-protocol envelope.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Message {
    Version(VersionPayload),
    Addr(Vec<PeerAddress>),
    Inv(Vec<InvItem>),
    GetData(Vec<InvItem>),
    Block(Block),
    Tx(Transaction),
    Ping { nonce: u64 },
    Pong { nonce: u64 },
}

impl Message {
    /// Message kind name, used for per-kind rate limiting and logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Version(_) => "version",
            Message::Addr(_) => "addr",
            Message::Inv(_) => "inv",
            Message::GetData(_) => "getdata",
            Message::Block(_) => "block",
            Message::Tx(_) => "tx",
            Message::Ping { .. } => "ping",
            Message::Pong { .. } => "pong",
        }
    }
}

/// Encode a message into a length-prefixed frame.
pub fn encode_frame(message: &Message) -> Result<Vec<u8>, NetworkError> {
    let body = serde_json::to_vec(message)
        .map_err(|e| NetworkError::MalformedMessage(e.to_string()))?;
    if body.len() > MAX_MESSAGE_SIZE {
        return Err(NetworkError::MessageTooLarge { size: body.len() });
    }
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decode a frame body back into a message.
pub fn decode_body(body: &[u8]) -> Result<Message, NetworkError> {
    serde_json::from_slice(body).map_err(|e| NetworkError::MalformedMessage(e.to_string()))
}

/// Write one framed message to a stream.
pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    message: &Message,
) -> Result<(), NetworkError> {
    let frame = encode_frame(message)?;
    writer
        .write_all(&frame)
        .await
        .map_err(|e| NetworkError::PeerDisconnected(e.to_string()))?;
    writer
        .flush()
        .await
        .map_err(|e| NetworkError::PeerDisconnected(e.to_string()))?;
    Ok(())
}

/// Read one framed message from a stream.
///
/// Rejects frames larger than [`MAX_MESSAGE_SIZE`] without reading the
/// body.
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Message, NetworkError> {
    let mut len_bytes = [0u8; 4];
    reader
        .read_exact(&mut len_bytes)
        .await
        .map_err(|e| NetworkError::PeerDisconnected(e.to_string()))?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(NetworkError::MessageTooLarge { size: len });
    }

    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| NetworkError::PeerDisconnected(e.to_string()))?;
    decode_body(&body)
}
