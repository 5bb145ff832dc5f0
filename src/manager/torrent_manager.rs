use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use size::{Size, Style};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::config::DownloadConfig;
use crate::manager::peer_connection::PeerConnection;
use crate::manager::piece_download::{check_integrity, download_piece, PieceResult, PieceWork};
use crate::metadata::metainfo::Metainfo;
use crate::util::pretty_info_hash;

// pause of a worker after its peer turned out to lack the piece it popped
const MISSING_PIECE_BACKOFF: Duration = Duration::from_millis(10);

#[derive(Debug, Error, PartialEq)]
pub enum ManagerError {
    #[error("no peer left to download from, got {downloaded}/{total} pieces")]
    PeersExhausted { downloaded: usize, total: usize },
}

// pieces still to be downloaded, shared by all the workers: any of them can push a piece back
#[derive(Clone)]
pub struct WorkQueue {
    tx: Sender<PieceWork>,
    rx: Arc<Mutex<Receiver<PieceWork>>>,
    #[cfg(test)]
    pops: Arc<AtomicUsize>,
}

impl WorkQueue {
    // capacity must be > 0 and at least the number of pieces, so that a push never waits
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        WorkQueue {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            #[cfg(test)]
            pops: Arc::default(),
        }
    }

    pub async fn push(&self, work: PieceWork) -> Result<()> {
        self.tx.send(work).await?;
        Ok(())
    }

    // the queue holds its own sender, so this only waits: it never returns None while self lives
    pub async fn pop(&self) -> Option<PieceWork> {
        #[cfg(test)]
        self.pops.fetch_add(1, Ordering::Relaxed);
        self.rx.lock().await.recv().await
    }
}

// counts the workers with an established connection, decremented however the worker ends
struct ActiveWorker(Arc<AtomicUsize>);

impl ActiveWorker {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        ActiveWorker(counter)
    }
}

impl Drop for ActiveWorker {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

pub struct TorrentManager {
    metainfo: Metainfo,
    peers: Vec<SocketAddr>,
    own_peer_id: [u8; 20],
    config: Arc<DownloadConfig>,
}

impl TorrentManager {
    pub fn new(
        metainfo: Metainfo,
        peers: Vec<SocketAddr>,
        own_peer_id: [u8; 20],
        config: DownloadConfig,
    ) -> Self {
        TorrentManager {
            metainfo,
            peers,
            own_peer_id,
            config: Arc::new(config),
        }
    }

    // one worker per peer, failed pieces go back to the queue until some worker gets them right.
    // Fails with PeersExhausted once every worker has stopped, dropping the future stops them all
    pub async fn download(&self) -> Result<Vec<u8>> {
        let num_pieces = self.metainfo.pieces.len();
        if num_pieces == 0 {
            return Ok(Vec::new());
        }
        log::info!(
            "downloading {} ({}, {} pieces, info hash {}) from {} peers",
            self.metainfo.name,
            Size::from_bytes(self.metainfo.length)
                .format()
                .with_style(Style::Abbreviated),
            num_pieces,
            pretty_info_hash(self.metainfo.info_hash),
            self.peers.len()
        );

        let work_queue = WorkQueue::new(num_pieces);
        for (index, hash) in self.metainfo.pieces.iter().enumerate() {
            let index = index as u32;
            work_queue
                .push(PieceWork {
                    index,
                    hash: *hash,
                    length: self.metainfo.piece_size(index),
                })
                .await?;
        }

        let (results_tx, mut results_rx) = mpsc::channel(num_pieces);
        let active_workers = Arc::new(AtomicUsize::new(0));
        // dropping the set aborts the workers still running
        let mut workers = JoinSet::new();
        for peer_addr in &self.peers {
            workers.spawn(run_worker(
                *peer_addr,
                self.metainfo.info_hash,
                self.own_peer_id,
                num_pieces,
                work_queue.clone(),
                results_tx.clone(),
                self.config.clone(),
                active_workers.clone(),
            ));
        }
        // from now on the results channel closes when the last worker is gone
        drop(results_tx);
        if self.peers.is_empty() {
            log::warn!("no peers to download {} from", self.metainfo.name);
        }

        let mut buf = vec![0u8; self.metainfo.length as usize];
        let mut done_pieces = 0;
        while done_pieces < num_pieces {
            let Some(result) = results_rx.recv().await else {
                return Err(ManagerError::PeersExhausted {
                    downloaded: done_pieces,
                    total: num_pieces,
                }
                .into());
            };
            let (begin, end) = self.metainfo.piece_bounds(result.index);
            buf[begin..end].copy_from_slice(&result.data);
            done_pieces += 1;

            let percent = done_pieces as f64 / num_pieces as f64 * 100.;
            log::info!(
                "({:.2}%) downloaded piece #{} from {} peers",
                percent,
                result.index,
                active_workers.load(Ordering::Relaxed)
            );
        }

        Ok(buf)
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_worker(
    peer_addr: SocketAddr,
    info_hash: [u8; 20],
    own_peer_id: [u8; 20],
    num_pieces: usize,
    work_queue: WorkQueue,
    results_tx: Sender<PieceResult>,
    config: Arc<DownloadConfig>,
    active_workers: Arc<AtomicUsize>,
) {
    let mut conn =
        match PeerConnection::connect(peer_addr, info_hash, own_peer_id, num_pieces, &config).await {
            Ok(conn) => conn,
            Err(e) => {
                log::warn!("could not establish connection with peer {peer_addr}: {e:#}");
                return;
            }
        };
    let _active = ActiveWorker::new(active_workers);
    log::debug!("peer {peer_addr}: connection established");

    match download_pieces(&mut conn, &work_queue, &results_tx, &config).await {
        Ok(()) => log::debug!("peer {peer_addr}: worker done"),
        Err(e) => log::warn!("peer {peer_addr}: disconnecting: {e:#}"),
    }
}

async fn download_pieces<S: AsyncRead + AsyncWrite + Unpin>(
    conn: &mut PeerConnection<S>,
    work_queue: &WorkQueue,
    results_tx: &Sender<PieceResult>,
    config: &DownloadConfig,
) -> Result<()> {
    conn.send_unchoke().await?;
    conn.send_interested().await?;

    while let Some(work) = work_queue.pop().await {
        if !conn.has_piece(work.index) {
            work_queue.push(work).await?;
            // let the other workers get to the queue, without spinning when no piece is left
            // for this peer
            tokio::time::sleep(MISSING_PIECE_BACKOFF).await;
            continue;
        }

        let data = match download_piece(conn, &work, config).await {
            Ok(data) => data,
            Err(e) => {
                work_queue.push(work).await?;
                return Err(e);
            }
        };

        if let Err(e) = check_integrity(&work, &data) {
            log::warn!("peer {}: {e}", conn.peer_addr());
            work_queue.push(work).await?;
            continue;
        }

        let have_result = conn.send_have(work.index).await;
        if results_tx
            .send(PieceResult {
                index: work.index,
                data,
            })
            .await
            .is_err()
        {
            // the download is over
            return Ok(());
        }
        have_result?;
    }
    Ok(())
}
