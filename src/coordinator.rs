//! The top-level download engine: bootstraps the peer set from the
//! tracker, fans pieces out to one worker task per peer over a shared
//! work queue, and drains verified pieces to the writer task.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch, Mutex, Notify};

use crate::conf::Conf;
use crate::disk;
use crate::error::{Error, Result};
use crate::metainfo::Metainfo;
use crate::peer::PeerSession;
use crate::piece::Piece;
use crate::storage_info::StorageInfo;
use crate::{tracker, PieceIndex, Sha1Hash};

/// Runs a download to completion: contacts the tracker, drives every peer
/// worker and the writer, and returns once every piece has been written or
/// the download is no longer able to make progress.
pub async fn run(metainfo: &Metainfo, output_path: &Path, conf: &Conf) -> Result<()> {
    let storage = StorageInfo::new(metainfo, output_path.to_path_buf());
    if storage.file.path.exists() {
        return Err(Error::OutputAlreadyExists);
    }

    let response = tracker::get_peers(metainfo, conf.engine.client_id, conf).await?;
    log::info!(
        "tracker returned {} peers, announce interval {:?}",
        response.peers.len(),
        response.interval
    );

    let piece_count = metainfo.piece_count();
    let info_hash = metainfo.info_hash();
    let piece_hashes: Arc<Vec<Sha1Hash>> = Arc::new(metainfo.info.pieces.clone());

    let (do_tx, do_rx) = mpsc::channel::<PieceIndex>(piece_count);
    let do_rx = Arc::new(Mutex::new(do_rx));
    for index in 0..piece_count {
        // the channel is sized to the piece count, so this never blocks
        do_tx.send(index).await?;
    }

    let (save_tx, save_rx) = mpsc::channel::<(PieceIndex, Vec<u8>)>(piece_count);
    let remaining = Arc::new(AtomicUsize::new(piece_count));
    let (done_tx, done_rx) = watch::channel(false);
    let notify_complete = Arc::new(Notify::new());

    let writer = tokio::spawn(disk::run(storage.clone(), save_rx));

    let mut worker_handles = Vec::with_capacity(response.peers.len());
    for addr in response.peers {
        let worker = Worker {
            do_rx: Arc::clone(&do_rx),
            do_tx: do_tx.clone(),
            save_tx: save_tx.clone(),
            done_rx: done_rx.clone(),
            remaining: Arc::clone(&remaining),
            notify_complete: Arc::clone(&notify_complete),
            storage: storage.clone(),
            piece_hashes: Arc::clone(&piece_hashes),
            session: PeerSession::new(
                std::net::SocketAddr::V4(addr),
                conf.engine.client_id,
                info_hash,
                conf.torrent.read_timeout,
            ),
        };
        worker_handles.push(tokio::spawn(worker.run()));
    }
    // the coordinator's own queue handles only exist to seed the queues and
    // carry the writer's receiver; every worker holds its own clone
    drop(do_tx);
    drop(save_tx);

    let (workers_done_tx, mut workers_done_rx) = oneshot::channel();
    let workers_task = tokio::spawn(async move {
        for handle in worker_handles {
            let _ = handle.await;
        }
        let _ = workers_done_tx.send(());
    });

    // wait for either every piece to be accounted for, or every worker to
    // have exited (all peers retired with pieces still outstanding)
    tokio::select! {
        _ = notify_complete.notified() => {}
        _ = &mut workers_done_rx => {}
    }

    // tell any still-running worker to stop dequeuing, then wait for the
    // workers task (and thus every queue-sender clone it's holding) to
    // actually finish before closing out the writer
    let _ = done_tx.send(true);
    let _ = workers_task.await;

    // every worker (and its queue-sender clones) is gone by now, so the
    // writer's receiver is guaranteed to observe a closed channel and
    // return, whether or not the download actually finished
    let writer_result = writer.await.map_err(|_| Error::AllPeersExhausted)?;

    if remaining.load(Ordering::SeqCst) > 0 {
        return Err(Error::AllPeersExhausted);
    }
    writer_result?;
    Ok(())
}

/// Per-peer worker state: one [`PeerSession`] plus shared handles onto the
/// coordinator's queues and bookkeeping.
struct Worker {
    do_rx: Arc<Mutex<mpsc::Receiver<PieceIndex>>>,
    do_tx: mpsc::Sender<PieceIndex>,
    save_tx: mpsc::Sender<(PieceIndex, Vec<u8>)>,
    done_rx: watch::Receiver<bool>,
    remaining: Arc<AtomicUsize>,
    notify_complete: Arc<Notify>,
    storage: StorageInfo,
    piece_hashes: Arc<Vec<Sha1Hash>>,
    session: PeerSession,
}

impl Worker {
    /// Dequeues pieces until the work queue is drained or shutdown is
    /// signaled, driving its `PeerSession` against each in turn.
    async fn run(mut self) {
        loop {
            if *self.done_rx.borrow() {
                return;
            }

            let index = {
                let mut do_rx = self.do_rx.lock().await;
                tokio::select! {
                    biased;
                    _ = self.done_rx.changed() => return,
                    index = do_rx.recv() => index,
                }
            };
            let index = match index {
                Some(index) => index,
                None => return,
            };

            if let Err(e) = self.download_piece(index).await {
                log::warn!(
                    "piece {} failed against {}: {}",
                    index,
                    self.session.addr(),
                    e
                );
                // requeue before taking any further action — a piece must
                // never vanish from circulation just because this worker
                // gives up on it (§4.6)
                if self.do_tx.send(index).await.is_err() {
                    return;
                }
                if retires_peer(&e) {
                    log::info!("retiring peer {}", self.session.addr());
                    return;
                }
                if closes_connection(&e) {
                    self.session.close();
                }
            }
        }
    }

    async fn download_piece(&mut self, index: PieceIndex) -> Result<()> {
        let piece_len = self.storage.piece_len(index)?;
        let expected_hash = *self
            .piece_hashes
            .get(index)
            .ok_or(Error::InvalidPieceIndex)?;

        let blocks = self.session.download_piece(index, piece_len).await?;

        let mut piece = Piece::new(index, expected_hash, piece_len);
        for (offset, data) in blocks {
            piece.push_block(offset, data);
        }
        let bytes = piece.into_verified_bytes()?;

        self.save_tx.send((index, bytes)).await?;
        if self.remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.notify_complete.notify_one();
        }
        Ok(())
    }
}

/// Whether an error retires the peer outright (§4.6/§7): the worker exits
/// and the session is dropped rather than retried.
fn retires_peer(e: &Error) -> bool {
    matches!(e, Error::PeerConnection(_) | Error::PeerInfoHashMismatch)
}

/// Whether an error (that doesn't retire the peer) still closes the
/// connection, forcing a reconnect on the worker's next iteration. A hash
/// mismatch or an unavailable piece leaves the connection as-is — the peer
/// is still good for other pieces.
fn closes_connection(e: &Error) -> bool {
    matches!(
        e,
        Error::Choke | Error::Io(_) | Error::Timeout | Error::UnexpectedMessage(_)
    )
}
