//! Snapshot encoding and decoding
//!
//! A snapshot is a stream of CRC-framed records:
//!
//! ```text
//! [length: u32][type: u8][payload: bytes][crc32: u32]
//! ```
//!
//! - **length**: size of type + payload + crc (NOT including length itself)
//! - **type**: frame tag (1=Header, 2=CommittedRow, 3=PendingStaging)
//! - **payload**: bincode-serialized record
//! - **crc32**: checksum over \[type\]\[payload\]
//!
//! The stream opens with exactly one header frame, then committed rows in
//! ascending key order, then one pending-staging frame per in-flight
//! transaction in transaction order. Applying a snapshot followed by the
//! log tail from `last_applied_index + 1` yields state byte-equivalent to
//! a never-restarted replica.

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use tessera_core::{Error, Key, PartitionId, Result, TxId, Value};
use tessera_storage::RowStore;

/// Magic number opening every snapshot stream
const MAGIC: u32 = 0x7E55_E7A0;
/// Current snapshot format version
const VERSION: u32 = 1;

/// Frame tags
const FRAME_HEADER: u8 = 1;
const FRAME_ROW: u8 = 2;
const FRAME_PENDING: u8 = 3;

/// Snapshot stream header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotHeader {
    /// Stream magic; always `0x7E55_E7A0` for a valid snapshot
    pub magic: u32,
    /// Format version
    pub version: u32,
    /// Partition the snapshot was taken from
    pub partition: PartitionId,
    /// Log index the state reflects; replay resumes after it
    pub last_applied_index: u64,
}

/// One committed row
///
/// `value == None` is a tombstone slot reserved by the format; the store
/// drops erased keys, so written snapshots only carry `Some` values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RowRecord {
    key: Key,
    value: Option<Value>,
}

/// Staged writes of one in-flight transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PendingRecord {
    tx_id: TxId,
    entries: Vec<(Key, Option<Value>)>,
}

/// Decoded snapshot stream
#[derive(Debug)]
pub struct SnapshotContents {
    /// The validated header
    pub header: SnapshotHeader,
    /// Committed rows in stream order
    pub rows: Vec<(Key, Value)>,
    /// Pending staging per transaction in stream order
    pub pending: Vec<(TxId, Vec<(Key, Option<Value>)>)>,
}

/// Serialise `store`'s state into `w`
pub fn write_snapshot(
    store: &RowStore,
    partition: PartitionId,
    last_applied_index: u64,
    w: &mut impl Write,
) -> Result<()> {
    let header = SnapshotHeader {
        magic: MAGIC,
        version: VERSION,
        partition,
        last_applied_index,
    };
    write_frame(w, FRAME_HEADER, &bincode::serialize(&header)?)?;

    for (key, value) in store.committed_rows() {
        let record = RowRecord {
            key,
            value: Some(value),
        };
        write_frame(w, FRAME_ROW, &bincode::serialize(&record)?)?;
    }

    for (tx_id, entries) in store.staged_writes() {
        let record = PendingRecord { tx_id, entries };
        write_frame(w, FRAME_PENDING, &bincode::serialize(&record)?)?;
    }
    Ok(())
}

/// Decode a snapshot stream from `r`, validating framing and checksums
pub fn read_snapshot(r: &mut impl Read) -> Result<SnapshotContents> {
    let (tag, payload) = match read_frame(r)? {
        Some(frame) => frame,
        None => return Err(Error::corruption("empty snapshot stream")),
    };
    if tag != FRAME_HEADER {
        return Err(Error::corruption(format!(
            "snapshot stream opens with frame type {tag}, expected header"
        )));
    }
    let header: SnapshotHeader = bincode::deserialize(&payload)?;
    if header.magic != MAGIC {
        return Err(Error::corruption(format!(
            "bad snapshot magic {:#010x}",
            header.magic
        )));
    }
    if header.version != VERSION {
        return Err(Error::corruption(format!(
            "unsupported snapshot version {}",
            header.version
        )));
    }

    let mut rows = Vec::new();
    let mut pending = Vec::new();
    while let Some((tag, payload)) = read_frame(r)? {
        match tag {
            FRAME_ROW => {
                let record: RowRecord = bincode::deserialize(&payload)?;
                if let Some(value) = record.value {
                    rows.push((record.key, value));
                }
            }
            FRAME_PENDING => {
                let record: PendingRecord = bincode::deserialize(&payload)?;
                pending.push((record.tx_id, record.entries));
            }
            FRAME_HEADER => {
                return Err(Error::corruption("duplicate snapshot header frame"));
            }
            other => {
                return Err(Error::corruption(format!(
                    "unknown snapshot frame type {other}"
                )));
            }
        }
    }

    Ok(SnapshotContents {
        header,
        rows,
        pending,
    })
}

fn write_frame(w: &mut impl Write, tag: u8, payload: &[u8]) -> Result<()> {
    let total_len = 1 + payload.len() + 4;
    w.write_all(&(total_len as u32).to_le_bytes())?;
    w.write_all(&[tag])?;
    w.write_all(payload)?;

    let mut hasher = Hasher::new();
    hasher.update(&[tag]);
    hasher.update(payload);
    w.write_all(&hasher.finalize().to_le_bytes())?;
    Ok(())
}

/// Read one frame; `None` at a clean end of stream
fn read_frame(r: &mut impl Read) -> Result<Option<(u8, Vec<u8>)>> {
    let mut len_bytes = [0u8; 4];
    match r.read_exact(&mut len_bytes) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let total_len = u32::from_le_bytes(len_bytes) as usize;
    if total_len < 5 {
        return Err(Error::corruption(format!(
            "snapshot frame length {total_len} below minimum"
        )));
    }

    let mut frame = vec![0u8; total_len];
    r.read_exact(&mut frame)
        .map_err(|_| Error::corruption("truncated snapshot frame"))?;

    let tag = frame[0];
    let payload = &frame[1..total_len - 4];
    let mut crc_bytes = [0u8; 4];
    crc_bytes.copy_from_slice(&frame[total_len - 4..]);
    let stored_crc = u32::from_le_bytes(crc_bytes);

    let mut hasher = Hasher::new();
    hasher.update(&frame[..total_len - 4]);
    if hasher.finalize() != stored_crc {
        return Err(Error::corruption(format!(
            "snapshot frame checksum mismatch for frame type {tag}"
        )));
    }
    Ok(Some((tag, payload.to_vec())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::{Seek, SeekFrom};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use tessera_concurrency::{LockManager, TxIdSource};
    use tessera_core::{NodeId, Row};

    struct SeqIds(AtomicU64, NodeId);

    impl TxIdSource for SeqIds {
        fn next_tx_id(&self) -> TxId {
            TxId::new(self.0.fetch_add(1, Ordering::SeqCst), self.1)
        }
    }

    fn store() -> RowStore {
        let ids = Arc::new(SeqIds(AtomicU64::new(1_000), NodeId::from_bytes([1; 16])));
        RowStore::new(Arc::new(LockManager::new()), ids)
    }

    fn tx(ticks: u64) -> TxId {
        TxId::new(ticks, NodeId::from_bytes([1; 16]))
    }

    async fn populated_store() -> RowStore {
        let store = store();
        store.upsert(Row::new("a", "1"), None).await.unwrap();
        store.upsert(Row::new("b", "2"), None).await.unwrap();
        store
            .upsert(Row::new("c", "staged"), Some(tx(5)))
            .await
            .unwrap();
        store.delete(&Key::from("a"), Some(tx(5))).await.unwrap();
        store
    }

    #[tokio::test]
    async fn roundtrip_preserves_rows_and_staging() {
        let store = populated_store().await;
        let mut buf = Vec::new();
        write_snapshot(&store, PartitionId(3), 42, &mut buf).unwrap();

        let contents = read_snapshot(&mut buf.as_slice()).unwrap();
        assert_eq!(contents.header.partition, PartitionId(3));
        assert_eq!(contents.header.last_applied_index, 42);
        assert_eq!(
            contents.rows,
            vec![
                (Key::from("a"), Value::from("1")),
                (Key::from("b"), Value::from("2")),
            ]
        );
        assert_eq!(contents.pending.len(), 1);
        assert_eq!(contents.pending[0].0, tx(5));
        assert_eq!(
            contents.pending[0].1,
            vec![
                (Key::from("a"), None),
                (Key::from("c"), Some(Value::from("staged"))),
            ]
        );
        store.rollback(tx(5));
    }

    #[tokio::test]
    async fn roundtrip_through_a_file() {
        let store = populated_store().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partition-3.snap");

        let mut file = File::create(&path).unwrap();
        write_snapshot(&store, PartitionId(3), 7, &mut file).unwrap();
        drop(file);

        let mut file = File::open(&path).unwrap();
        let contents = read_snapshot(&mut file).unwrap();
        assert_eq!(contents.rows.len(), 2);
        assert_eq!(contents.pending.len(), 1);
        store.rollback(tx(5));
    }

    #[tokio::test]
    async fn corrupted_frame_is_rejected() {
        let store = populated_store().await;
        let mut buf = Vec::new();
        write_snapshot(&store, PartitionId(0), 1, &mut buf).unwrap();
        store.rollback(tx(5));

        // Flip one payload byte past the first frame's length prefix.
        let mid = buf.len() / 2;
        buf[mid] ^= 0x40;
        let err = read_snapshot(&mut buf.as_slice()).unwrap_err();
        assert!(err.is_serious());
    }

    #[tokio::test]
    async fn truncated_stream_is_rejected() {
        let store = populated_store().await;
        let mut buf = Vec::new();
        write_snapshot(&store, PartitionId(0), 1, &mut buf).unwrap();
        store.rollback(tx(5));

        buf.truncate(buf.len() - 3);
        let err = read_snapshot(&mut buf.as_slice()).unwrap_err();
        assert!(matches!(err, Error::Corruption { .. }));
    }

    #[test]
    fn empty_stream_is_rejected() {
        let err = read_snapshot(&mut std::io::empty()).unwrap_err();
        assert!(err.is_serious());
    }

    #[test]
    fn bad_magic_is_rejected() {
        let header = SnapshotHeader {
            magic: 0xDEAD_BEEF,
            version: VERSION,
            partition: PartitionId(0),
            last_applied_index: 0,
        };
        let mut buf = Vec::new();
        write_frame(&mut buf, FRAME_HEADER, &bincode::serialize(&header).unwrap()).unwrap();
        let err = read_snapshot(&mut buf.as_slice()).unwrap_err();
        assert!(err.to_string().contains("magic"));
    }

    #[test]
    fn frame_roundtrip_through_rewound_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe.snap");
        let mut file = File::options()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .unwrap();
        write_frame(&mut file, FRAME_ROW, b"payload").unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();
        let (tag, payload) = read_frame(&mut file).unwrap().unwrap();
        assert_eq!(tag, FRAME_ROW);
        assert_eq!(payload, b"payload");
    }
}
