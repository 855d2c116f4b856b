//! TCP wire framing for transfer sessions.
//!
//! # Wire format
//!
//! Every message is length-prefixed so the peer can read an exact
//! number of bytes before parsing:
//!
//! ```text
//! FRAME: [1 byte: type][4 bytes BE: payload_len][payload]
//!
//! MANIFEST      (0x01): [manifest JSON]
//! HELD_SET      (0x02): [4B BE count] [4B BE index]*count   (ascending)
//! CHUNK         (0x03): [4B BE index] [12B nonce] [ciphertext]
//! CHUNK_ACK     (0x04): [4B BE index] [1B: 0x01 accept / 0x00 reject]
//! FINAL_VERDICT (0x05): [1B: 0x01 success / 0x00 failure]
//!                       [32B expected hash] [32B computed hash]
//! ```

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::manifest::{Manifest, ManifestError};
use crate::{HASH_LEN, NONCE_LEN};

/// Chunk acknowledgment: accepted.
pub const ACK_ACCEPT: u8 = 0x01;

/// Chunk acknowledgment: rejected (hash mismatch, re-send).
pub const ACK_REJECT: u8 = 0x00;

/// Frame type discriminants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    Manifest = 0x01,
    HeldSet = 0x02,
    Chunk = 0x03,
    ChunkAck = 0x04,
    FinalVerdict = 0x05,
}

impl FrameType {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(FrameType::Manifest),
            0x02 => Some(FrameType::HeldSet),
            0x03 => Some(FrameType::Chunk),
            0x04 => Some(FrameType::ChunkAck),
            0x05 => Some(FrameType::FinalVerdict),
            _ => None,
        }
    }
}

/// A parsed protocol frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Per-file metadata, sent first on every attempt.
    Manifest(Manifest),
    /// Chunk indices the receiver already holds and has re-verified.
    HeldSet(Vec<u32>),
    /// One encrypted chunk payload.
    Chunk {
        index: u32,
        nonce: [u8; NONCE_LEN],
        ciphertext: Vec<u8>,
    },
    /// Receiver verdict for a single chunk.
    ChunkAck { index: u32, accepted: bool },
    /// Whole-file verdict after reassembly.
    FinalVerdict {
        success: bool,
        expected_hash: [u8; HASH_LEN],
        computed_hash: [u8; HASH_LEN],
    },
}

impl Frame {
    /// Returns the wire type of this frame.
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Manifest(_) => FrameType::Manifest,
            Frame::HeldSet(_) => FrameType::HeldSet,
            Frame::Chunk { .. } => FrameType::Chunk,
            Frame::ChunkAck { .. } => FrameType::ChunkAck,
            Frame::FinalVerdict { .. } => FrameType::FinalVerdict,
        }
    }
}

/// Errors produced by frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("malformed manifest: {0}")]
    Manifest(#[from] ManifestError),
}

/// Writes a frame and flushes the stream.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &Frame,
) -> Result<(), WireError> {
    let payload = encode_payload(frame)?;
    if payload.len() > u32::MAX as usize {
        return Err(WireError::Protocol(format!(
            "payload too large: {} bytes",
            payload.len()
        )));
    }

    writer.write_u8(frame.frame_type() as u8).await?;
    writer.write_u32(payload.len() as u32).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame, rejecting payloads larger than `max_payload`
/// before allocating.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_payload: usize,
) -> Result<Frame, WireError> {
    let type_byte = reader.read_u8().await?;
    let frame_type = FrameType::from_byte(type_byte)
        .ok_or_else(|| WireError::Protocol(format!("unknown frame type 0x{type_byte:02x}")))?;

    let len = reader.read_u32().await? as usize;
    if len > max_payload {
        return Err(WireError::Protocol(format!(
            "frame payload {len} exceeds limit {max_payload}"
        )));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    decode_payload(frame_type, &payload)
}

fn encode_payload(frame: &Frame) -> Result<Vec<u8>, WireError> {
    match frame {
        Frame::Manifest(manifest) => Ok(manifest.to_bytes()?),
        Frame::HeldSet(indices) => {
            let mut buf = Vec::with_capacity(4 + indices.len() * 4);
            buf.extend_from_slice(&(indices.len() as u32).to_be_bytes());
            for index in indices {
                buf.extend_from_slice(&index.to_be_bytes());
            }
            Ok(buf)
        }
        Frame::Chunk {
            index,
            nonce,
            ciphertext,
        } => {
            let mut buf = Vec::with_capacity(4 + NONCE_LEN + ciphertext.len());
            buf.extend_from_slice(&index.to_be_bytes());
            buf.extend_from_slice(nonce);
            buf.extend_from_slice(ciphertext);
            Ok(buf)
        }
        Frame::ChunkAck { index, accepted } => {
            let mut buf = Vec::with_capacity(5);
            buf.extend_from_slice(&index.to_be_bytes());
            buf.push(if *accepted { ACK_ACCEPT } else { ACK_REJECT });
            Ok(buf)
        }
        Frame::FinalVerdict {
            success,
            expected_hash,
            computed_hash,
        } => {
            let mut buf = Vec::with_capacity(1 + 2 * HASH_LEN);
            buf.push(if *success { 0x01 } else { 0x00 });
            buf.extend_from_slice(expected_hash);
            buf.extend_from_slice(computed_hash);
            Ok(buf)
        }
    }
}

fn decode_payload(frame_type: FrameType, payload: &[u8]) -> Result<Frame, WireError> {
    match frame_type {
        FrameType::Manifest => Ok(Frame::Manifest(Manifest::parse(payload)?)),
        FrameType::HeldSet => {
            if payload.len() < 4 {
                return Err(WireError::Protocol("held set truncated".into()));
            }
            let count = u32::from_be_bytes(payload[..4].try_into().unwrap()) as usize;
            if payload.len() != 4 + count * 4 {
                return Err(WireError::Protocol(format!(
                    "held set declares {count} entries but carries {} bytes",
                    payload.len() - 4
                )));
            }
            let mut indices = Vec::with_capacity(count);
            let mut prev: Option<u32> = None;
            for slot in payload[4..].chunks_exact(4) {
                let index = u32::from_be_bytes(slot.try_into().unwrap());
                if let Some(p) = prev {
                    if index <= p {
                        return Err(WireError::Protocol(format!(
                            "held set not ascending: {index} after {p}"
                        )));
                    }
                }
                prev = Some(index);
                indices.push(index);
            }
            Ok(Frame::HeldSet(indices))
        }
        FrameType::Chunk => {
            if payload.len() < 4 + NONCE_LEN {
                return Err(WireError::Protocol("chunk frame truncated".into()));
            }
            let index = u32::from_be_bytes(payload[..4].try_into().unwrap());
            let mut nonce = [0u8; NONCE_LEN];
            nonce.copy_from_slice(&payload[4..4 + NONCE_LEN]);
            Ok(Frame::Chunk {
                index,
                nonce,
                ciphertext: payload[4 + NONCE_LEN..].to_vec(),
            })
        }
        FrameType::ChunkAck => {
            if payload.len() != 5 {
                return Err(WireError::Protocol("chunk ack truncated".into()));
            }
            let index = u32::from_be_bytes(payload[..4].try_into().unwrap());
            let accepted = match payload[4] {
                ACK_ACCEPT => true,
                ACK_REJECT => false,
                other => {
                    return Err(WireError::Protocol(format!(
                        "invalid ack byte 0x{other:02x}"
                    )));
                }
            };
            Ok(Frame::ChunkAck { index, accepted })
        }
        FrameType::FinalVerdict => {
            if payload.len() != 1 + 2 * HASH_LEN {
                return Err(WireError::Protocol("final verdict truncated".into()));
            }
            let success = match payload[0] {
                0x01 => true,
                0x00 => false,
                other => {
                    return Err(WireError::Protocol(format!(
                        "invalid verdict byte 0x{other:02x}"
                    )));
                }
            };
            let mut expected_hash = [0u8; HASH_LEN];
            expected_hash.copy_from_slice(&payload[1..1 + HASH_LEN]);
            let mut computed_hash = [0u8; HASH_LEN];
            computed_hash.copy_from_slice(&payload[1 + HASH_LEN..]);
            Ok(Frame::FinalVerdict {
                success,
                expected_hash,
                computed_hash,
            })
        }
    }
}
