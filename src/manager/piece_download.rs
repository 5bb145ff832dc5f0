use anyhow::Result;
use sha1::{Digest, Sha1};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;

use crate::config::DownloadConfig;
use crate::manager::peer_connection::PeerConnection;
use crate::torrent_protocol::wire_protocol::MessageId;

#[derive(Debug, Error, PartialEq)]
pub enum PieceError {
    #[error("piece #{index} failed integrity check")]
    Corrupted { index: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PieceWork {
    pub index: u32,
    pub hash: [u8; 20],
    pub length: u32,
}

#[derive(Debug)]
pub struct PieceResult {
    pub index: u32,
    pub data: Vec<u8>,
}

// state of one attempt at one piece, discarded when the attempt ends
struct PieceProgress {
    index: u32,
    buf: Vec<u8>,
    downloaded: u32,
    requested: u32,
    backlog: u32,
}

impl PieceProgress {
    async fn read_message<S: AsyncRead + AsyncWrite + Unpin>(
        &mut self,
        conn: &mut PeerConnection<S>,
    ) -> Result<()> {
        let message = conn.read().await?;
        match message.id() {
            Some(MessageId::Choke) => conn.set_choked(true),
            Some(MessageId::Unchoke) => conn.set_choked(false),
            Some(MessageId::Have) => {
                let index = message.parse_have()?;
                conn.record_have(index)?;
            }
            Some(MessageId::Piece) => {
                let received = message.parse_piece(self.index, &mut self.buf)?;
                self.downloaded += received as u32;
                self.backlog = self.backlog.saturating_sub(1);
            }
            // keep-alive and messages a leecher-only client does not act upon
            _ => {}
        }
        Ok(())
    }
}

// pipelines up to max_backlog block requests, the whole attempt runs under one piece_timeout
// deadline cleared on return. The returned data is not verified yet
pub async fn download_piece<S: AsyncRead + AsyncWrite + Unpin>(
    conn: &mut PeerConnection<S>,
    work: &PieceWork,
    config: &DownloadConfig,
) -> Result<Vec<u8>> {
    conn.set_deadline(Some(Instant::now() + config.piece_timeout));
    let result = attempt_download_piece(conn, work, config).await;
    conn.set_deadline(None);
    result
}

async fn attempt_download_piece<S: AsyncRead + AsyncWrite + Unpin>(
    conn: &mut PeerConnection<S>,
    work: &PieceWork,
    config: &DownloadConfig,
) -> Result<Vec<u8>> {
    let mut state = PieceProgress {
        index: work.index,
        buf: vec![0; work.length as usize],
        downloaded: 0,
        requested: 0,
        backlog: 0,
    };

    while state.downloaded < work.length {
        // fill the pipeline while unchoked
        while !conn.is_choked()
            && state.backlog < config.max_backlog
            && state.requested < work.length
        {
            let block_size = config.block_size.min(work.length - state.requested);
            conn.send_request(work.index, state.requested, block_size)
                .await?;
            state.backlog += 1;
            state.requested += block_size;
        }

        state.read_message(conn).await?;
    }

    Ok(state.buf)
}

pub fn check_integrity(work: &PieceWork, buf: &[u8]) -> Result<(), PieceError> {
    let hash: [u8; 20] = Sha1::digest(buf).into();
    if hash != work.hash {
        return Err(PieceError::Corrupted { index: work.index });
    }
    Ok(())
}
