//! The file writer: a single task that drains verified pieces and writes
//! them to their absolute offset in the output file.

use std::fs::OpenOptions;
use std::os::unix::fs::FileExt;

use tokio::sync::mpsc;
use tokio::task;

use crate::error::{Error, Result};
use crate::storage_info::StorageInfo;
use crate::PieceIndex;

/// Opens the output file (failing if it already exists — this engine
/// doesn't support resuming or overwriting a previous download) and writes
/// every piece handed to it at `piece_index * piece_len` until `save_rx`
/// closes.
pub async fn run(
    storage: StorageInfo,
    mut save_rx: mpsc::Receiver<(PieceIndex, Vec<u8>)>,
) -> Result<()> {
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&storage.file.path)?;

    while let Some((index, bytes)) = save_rx.recv().await {
        let offset = storage.piece_offset(index);
        let file = file.try_clone()?;
        task::spawn_blocking(move || write_at_all(&file, &bytes, offset))
            .await
            .map_err(|_| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "writer task panicked",
                ))
            })??;
    }

    Ok(())
}

/// Writes the whole of `buf` at `offset`, looping over `write_at` to cover
/// the case of a short write.
fn write_at_all(file: &std::fs::File, mut buf: &[u8], mut offset: u64) -> Result<()> {
    while !buf.is_empty() {
        let written = file.write_at(buf, offset)?;
        if written == 0 {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "failed to write whole piece",
            )));
        }
        buf = &buf[written..];
        offset += written as u64;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metainfo::Metainfo;
    use tempfile_test_support::temp_path;

    // a tiny local stand-in for a scratch path, since this crate doesn't
    // depend on `tempfile`: a path under the OS temp dir salted with the
    // current thread and an incrementing counter.
    mod tempfile_test_support {
        use std::path::PathBuf;
        use std::sync::atomic::{AtomicU64, Ordering};

        static COUNTER: AtomicU64 = AtomicU64::new(0);

        pub fn temp_path(name: &str) -> PathBuf {
            let n = COUNTER.fetch_add(1, Ordering::Relaxed);
            std::env::temp_dir().join(format!(
                "leechcraft-disk-test-{}-{}-{}",
                std::process::id(),
                n,
                name
            ))
        }
    }

    fn sample_metainfo(piece_length: u32, length: u64, piece_count: usize) -> Metainfo {
        let pieces: Vec<u8> = std::iter::repeat(0u8).take(20 * piece_count).collect();
        let mut info = Vec::new();
        info.extend_from_slice(
            format!(
                "d6:lengthi{}e4:name1:a12:piece lengthi{}e6:pieces{}:",
                length,
                piece_length,
                pieces.len()
            )
            .as_bytes(),
        );
        info.extend_from_slice(&pieces);
        info.push(b'e');
        let mut out = Vec::new();
        out.extend_from_slice(b"d8:announce4:http4:info");
        out.extend_from_slice(&info);
        out.push(b'e');
        Metainfo::from_bytes(&out).unwrap()
    }

    #[tokio::test]
    async fn writes_pieces_at_their_offset() {
        let metainfo = sample_metainfo(4, 10, 3);
        let path = temp_path("basic");
        let _ = std::fs::remove_file(&path);
        let storage = StorageInfo::new(&metainfo, path.clone());

        let (tx, rx) = mpsc::channel(4);
        let writer = tokio::spawn(run(storage, rx));

        tx.send((1, vec![9, 9, 9, 9])).await.unwrap();
        tx.send((0, vec![1, 2, 3, 4])).await.unwrap();
        tx.send((2, vec![7, 7])).await.unwrap();
        drop(tx);

        writer.await.unwrap().unwrap();

        let written = std::fs::read(&path).unwrap();
        assert_eq!(written, vec![1, 2, 3, 4, 9, 9, 9, 9, 7, 7]);

        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn refuses_to_overwrite_existing_output() {
        let path = temp_path("exists");
        std::fs::write(&path, b"already here").unwrap();

        let metainfo = sample_metainfo(4, 10, 3);
        let storage = StorageInfo::new(&metainfo, path.clone());
        let (_tx, rx) = mpsc::channel(1);

        match run(storage, rx).await {
            Err(Error::Io(_)) => {}
            other => panic!("expected an I/O error, got {:?}", other.map(|_| ())),
        }

        std::fs::remove_file(&path).unwrap();
    }
}
