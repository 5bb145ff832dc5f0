use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, timeout_at, Instant};

use crate::config::DownloadConfig;
use crate::torrent_protocol::bitfield::Bitfield;
use crate::torrent_protocol::handshake::Handshake;
use crate::torrent_protocol::wire_protocol::{Message, MessageId, ProtocolError};
use crate::util::pretty_info_hash;

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("timed out connecting to peer")]
    DialTimeout,
    #[error("timed out waiting for peer")]
    Timeout,
    #[error("own and their info hash did not match (own: {own}, theirs: {theirs})")]
    InfoHashMismatch { own: String, theirs: String },
    #[error("expected bitfield as first message but got {0}")]
    ExpectedBitfield(String),
}

// one connection to one remote peer, owned by a single worker
pub struct PeerConnection<S = TcpStream> {
    stream: S,
    peer_addr: SocketAddr,
    choked: bool,
    bitfield: Bitfield,
    info_hash: [u8; 20],
    own_peer_id: [u8; 20],
    deadline: Option<Instant>, // governs every read and write when set
}

impl PeerConnection<TcpStream> {
    pub async fn connect(
        peer_addr: SocketAddr,
        info_hash: [u8; 20],
        own_peer_id: [u8; 20],
        num_pieces: usize,
        config: &DownloadConfig,
    ) -> Result<Self> {
        log::trace!("initiating connection to peer: {}", peer_addr);
        let stream = match timeout(config.dial_timeout, TcpStream::connect(peer_addr)).await {
            Err(_elapsed) => return Err(PeerError::DialTimeout.into()),
            Ok(stream) => stream?,
        };
        Self::establish(
            stream,
            peer_addr,
            info_hash,
            own_peer_id,
            num_pieces,
            config.handshake_timeout,
        )
        .await
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> PeerConnection<S> {
    // handshake, then the first message must be the peer's bitfield, each step bounded by
    // handshake_timeout
    pub async fn establish(
        stream: S,
        peer_addr: SocketAddr,
        info_hash: [u8; 20],
        own_peer_id: [u8; 20],
        num_pieces: usize,
        handshake_timeout: Duration,
    ) -> Result<Self> {
        let mut conn = PeerConnection {
            stream,
            peer_addr,
            choked: true,
            bitfield: Bitfield::new(num_pieces),
            info_hash,
            own_peer_id,
            deadline: None,
        };

        conn.set_deadline(Some(Instant::now() + handshake_timeout));
        conn.complete_handshake().await?;

        conn.set_deadline(Some(Instant::now() + handshake_timeout));
        conn.receive_bitfield().await?;

        conn.set_deadline(None);
        Ok(conn)
    }

    async fn complete_handshake(&mut self) -> Result<Handshake> {
        log::trace!("peer {}: sending handshake", self.peer_addr);
        let handshake = Handshake::new(self.info_hash, self.own_peer_id);
        self.write_all(handshake.serialize()?).await?;

        log::trace!("peer {}: receiving handshake", self.peer_addr);
        let theirs = bounded(self.deadline, Handshake::read(&mut self.stream)).await?;
        log::trace!(
            "received handshake info from {}: {}",
            self.peer_addr,
            theirs
        );
        if theirs.info_hash != self.info_hash {
            return Err(PeerError::InfoHashMismatch {
                own: pretty_info_hash(self.info_hash),
                theirs: pretty_info_hash(theirs.info_hash),
            }
            .into());
        }
        Ok(theirs)
    }

    async fn receive_bitfield(&mut self) -> Result<()> {
        match self.read().await? {
            Message::Frame {
                id: MessageId::Bitfield,
                payload,
            } => {
                self.bitfield = Bitfield::from_payload(&payload, self.bitfield.num_pieces());
                log::debug!(
                    "peer {}: has {}/{} pieces",
                    self.peer_addr,
                    self.bitfield.count(),
                    self.bitfield.num_pieces()
                );
                log::trace!(
                    "peer {}: bitfield {}",
                    self.peer_addr,
                    hex::encode(self.bitfield.as_bytes())
                );
                Ok(())
            }
            other => Err(PeerError::ExpectedBitfield(other.to_string()).into()),
        }
    }

    pub async fn read(&mut self) -> Result<Message> {
        let message = bounded(self.deadline, Message::read(&mut self.stream)).await?;
        log::trace!("received from {}: {}", self.peer_addr, message);
        Ok(message)
    }

    pub async fn send(&mut self, message: Message) -> Result<()> {
        log::trace!("sending message {} to peer {}", message, self.peer_addr);
        self.write_all(message.serialize()).await
    }

    async fn write_all(&mut self, buf: Vec<u8>) -> Result<()> {
        let stream = &mut self.stream;
        bounded(self.deadline, async move {
            stream.write_all(&buf).await?;
            Ok::<(), anyhow::Error>(())
        })
        .await
    }

    pub async fn send_unchoke(&mut self) -> Result<()> {
        self.send(Message::new(MessageId::Unchoke)).await
    }

    pub async fn send_interested(&mut self) -> Result<()> {
        self.send(Message::new(MessageId::Interested)).await
    }

    #[allow(dead_code)]
    pub async fn send_not_interested(&mut self) -> Result<()> {
        self.send(Message::new(MessageId::NotInterested)).await
    }

    pub async fn send_have(&mut self, index: u32) -> Result<()> {
        self.send(Message::format_have(index)).await
    }

    pub async fn send_request(&mut self, index: u32, begin: u32, length: u32) -> Result<()> {
        self.send(Message::format_request(index, begin, length))
            .await
    }

    pub fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }

    #[cfg(test)]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_choked(&self) -> bool {
        self.choked
    }

    pub fn set_choked(&mut self, choked: bool) {
        self.choked = choked;
    }

    pub fn has_piece(&self, index: u32) -> bool {
        self.bitfield.has_piece(index as usize)
    }

    // a have for a piece outside the torrent is malformed
    pub fn record_have(&mut self, index: u32) -> Result<(), ProtocolError> {
        if index as usize >= self.bitfield.num_pieces() {
            return Err(ProtocolError::HaveOutOfRange {
                index,
                num_pieces: self.bitfield.num_pieces(),
            });
        }
        self.bitfield.set_piece(index as usize);
        Ok(())
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

async fn bounded<T>(deadline: Option<Instant>, fut: impl Future<Output = Result<T>>) -> Result<T> {
    match deadline {
        None => fut.await,
        Some(deadline) => timeout_at(deadline, fut)
            .await
            .map_err(|_elapsed| PeerError::Timeout)?,
    }
}
