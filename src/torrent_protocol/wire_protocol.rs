use std::fmt;

use anyhow::Result;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

// a piece message carrying a full 16 KiB block is 16384 + 9 bytes, the biggest bitfield we accept
// covers 8M pieces
pub const MAX_MESSAGE_LEN: u32 = (1 << 20) + 13;

#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    #[error("handshake protocol string length cannot be zero")]
    EmptyProtocolString,
    #[error("handshake protocol string of {0} bytes does not fit its one byte length prefix")]
    ProtocolStringTooLong(usize),
    #[error("message of length {0} exceeds the max allowed length {max}", max = MAX_MESSAGE_LEN)]
    MessageTooLong(u32),
    #[error("could not parse message type id: {0}")]
    UnknownMessageId(u8),
    #[error("expected {expected} message, received {got}")]
    UnexpectedMessage { expected: MessageId, got: String },
    #[error("expected {id} payload of {expected} bytes, received {got}")]
    PayloadLength {
        id: MessageId,
        expected: usize,
        got: usize,
    },
    #[error("{id} payload of {got} bytes is too short, it must be at least {min} bytes")]
    PayloadTooShort { id: MessageId, min: usize, got: usize },
    #[error("expected piece index {expected} but got {got}")]
    IndexMismatch { expected: u32, got: u32 },
    #[error("begin offset {begin} must be less than piece length {len}")]
    BeginOutOfRange { begin: u32, len: usize },
    #[error("block of {block_len} bytes at offset {begin} overflows piece length {len}")]
    BlockOverflow {
        begin: u32,
        block_len: usize,
        len: usize,
    },
    #[error("have for piece index {index} but the torrent has {num_pieces} pieces")]
    HaveOutOfRange { index: u32, num_pieces: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
}

impl TryFrom<u8> for MessageId {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageId::Choke),
            1 => Ok(MessageId::Unchoke),
            2 => Ok(MessageId::Interested),
            3 => Ok(MessageId::NotInterested),
            4 => Ok(MessageId::Have),
            5 => Ok(MessageId::Bitfield),
            6 => Ok(MessageId::Request),
            7 => Ok(MessageId::Piece),
            8 => Ok(MessageId::Cancel),
            unknown => Err(ProtocolError::UnknownMessageId(unknown)),
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            MessageId::Choke => "choke",
            MessageId::Unchoke => "unchoke",
            MessageId::Interested => "interested",
            MessageId::NotInterested => "not interested",
            MessageId::Have => "have",
            MessageId::Bitfield => "bitfield",
            MessageId::Request => "request",
            MessageId::Piece => "piece",
            MessageId::Cancel => "cancel",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    KeepAlive, // zero length frame, no id and no payload
    Frame { id: MessageId, payload: Vec<u8> },
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Message::KeepAlive => write!(f, "keep-alive"),
            Message::Frame { id, payload } => match id {
                MessageId::Have | MessageId::Request | MessageId::Piece | MessageId::Cancel
                    if payload.len() >= 4 =>
                {
                    write!(
                        f,
                        "{id}: piece idx: {}, payload len: {}",
                        read_u32(&payload[0..4]),
                        payload.len()
                    )
                }
                _ => write!(f, "{id}: payload len: {}", payload.len()),
            },
        }
    }
}

impl Message {
    pub fn new(id: MessageId) -> Self {
        Message::Frame {
            id,
            payload: Vec::new(),
        }
    }

    pub fn with_payload(id: MessageId, payload: Vec<u8>) -> Self {
        Message::Frame { id, payload }
    }

    pub fn id(&self) -> Option<MessageId> {
        match self {
            Message::KeepAlive => None,
            Message::Frame { id, .. } => Some(*id),
        }
    }

    pub fn format_have(index: u32) -> Self {
        Message::with_payload(MessageId::Have, index.to_be_bytes().to_vec())
    }

    pub fn format_request(index: u32, begin: u32, length: u32) -> Self {
        let mut payload = vec![0; 12];
        payload[0..4].copy_from_slice(&index.to_be_bytes());
        payload[4..8].copy_from_slice(&begin.to_be_bytes());
        payload[8..12].copy_from_slice(&length.to_be_bytes());
        Message::with_payload(MessageId::Request, payload)
    }

    // <length prefix: 4 bytes BE><message id: 1 byte><payload>
    pub fn serialize(&self) -> Vec<u8> {
        match self {
            Message::KeepAlive => vec![0; 4],
            Message::Frame { id, payload } => {
                let length = 1 + payload.len() as u32;
                let mut buf = Vec::with_capacity(4 + length as usize);
                buf.extend_from_slice(&length.to_be_bytes());
                buf.push(*id as u8);
                buf.extend_from_slice(payload);
                buf
            }
        }
    }

    pub async fn read<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Message> {
        // get size of message
        let mut size_message_buf: [u8; 4] = [0; 4];
        reader.read_exact(&mut size_message_buf).await?;
        let size_message = u32::from_be_bytes(size_message_buf);
        if size_message == 0 {
            return Ok(Message::KeepAlive);
        }
        if size_message > MAX_MESSAGE_LEN {
            return Err(ProtocolError::MessageTooLong(size_message).into());
        }

        // get type of message
        let mut type_message_buf: [u8; 1] = [0; 1];
        reader.read_exact(&mut type_message_buf).await?;
        let id = MessageId::try_from(type_message_buf[0])?;

        let mut payload = vec![0; (size_message - 1) as usize];
        reader.read_exact(&mut payload).await?;
        Ok(Message::Frame { id, payload })
    }

    pub fn parse_have(&self) -> Result<u32, ProtocolError> {
        let payload = self.expect_payload(MessageId::Have)?;
        if payload.len() != 4 {
            return Err(ProtocolError::PayloadLength {
                id: MessageId::Have,
                expected: 4,
                got: payload.len(),
            });
        }
        Ok(read_u32(payload))
    }

    // copies the block into buf at the offset embedded in the message, buf is untouched on error
    pub fn parse_piece(&self, expected_index: u32, buf: &mut [u8]) -> Result<usize, ProtocolError> {
        let payload = self.expect_payload(MessageId::Piece)?;
        if payload.len() < 8 {
            return Err(ProtocolError::PayloadTooShort {
                id: MessageId::Piece,
                min: 8,
                got: payload.len(),
            });
        }
        let index = read_u32(&payload[0..4]);
        if index != expected_index {
            return Err(ProtocolError::IndexMismatch {
                expected: expected_index,
                got: index,
            });
        }
        let begin = read_u32(&payload[4..8]);
        if begin as usize >= buf.len() {
            return Err(ProtocolError::BeginOutOfRange {
                begin,
                len: buf.len(),
            });
        }
        let block = &payload[8..];
        if begin as usize + block.len() > buf.len() {
            return Err(ProtocolError::BlockOverflow {
                begin,
                block_len: block.len(),
                len: buf.len(),
            });
        }
        buf[begin as usize..begin as usize + block.len()].copy_from_slice(block);
        Ok(block.len())
    }

    fn expect_payload(&self, expected: MessageId) -> Result<&[u8], ProtocolError> {
        match self {
            Message::Frame { id, payload } if *id == expected => Ok(payload),
            other => Err(ProtocolError::UnexpectedMessage {
                expected,
                got: other.to_string(),
            }),
        }
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[0..4]);
    u32::from_be_bytes(buf)
}
