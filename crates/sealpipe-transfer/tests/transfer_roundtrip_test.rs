//! End-to-end transfers over in-memory pipes.
//!
//! The sender and receiver talk through a relay task that parses the wire
//! format, records every sealed frame length and can inject faults (flipped
//! bytes, cut connections) at a chosen frame.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use sealpipe_crypto::ReceiverKeyPair;
use sealpipe_transfer::{Manifest, ReceivedFile, Receiver, Sender, Step, TransferError, TransferResult};
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

const MIB: usize = 1 << 20;
const TAG: usize = 16;
const PIPE: usize = 64 * 1024;

#[derive(Clone, Copy)]
enum Fault {
    None,
    /// Flip one bit of sealed frame `frame` (0 = manifest) at `offset`.
    Flip { frame: usize, offset: usize },
    /// Forward half of frame `frame`, then drop the connection.
    Cut { frame: usize },
}

enum Source {
    File(PathBuf),
    /// Send `data` under a manifest that may not describe it.
    Lying { manifest: Manifest, data: Vec<u8> },
}

struct Outcome {
    sent: TransferResult<()>,
    received: TransferResult<ReceivedFile>,
    frames: Vec<usize>,
    progress: Vec<u64>,
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i.wrapping_mul(31) % 251) as u8).collect()
}

fn write_test_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).expect("write test file");
    path
}

fn dir_entries(dir: &Path) -> Vec<String> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    }
}

/// Forward the handshake untouched, then relay sealed frames from sender to
/// receiver, applying `fault`. Returns the lengths of the frames forwarded.
async fn relay(
    mut sender: DuplexStream,
    mut receiver: DuplexStream,
    fault: Fault,
) -> std::io::Result<Vec<usize>> {
    // public key announcement: receiver -> sender
    let mut head = [0u8; 5];
    receiver.read_exact(&mut head).await?;
    let mut body = vec![0u8; u32::from_be_bytes(head[1..5].try_into().unwrap()) as usize];
    receiver.read_exact(&mut body).await?;
    sender.write_all(&head).await?;
    sender.write_all(&body).await?;

    // session key delivery: sender -> receiver, with the 12-byte nonce trailer
    sender.read_exact(&mut head).await?;
    let mut body = vec![0u8; u32::from_be_bytes(head[1..5].try_into().unwrap()) as usize + 12];
    sender.read_exact(&mut body).await?;
    receiver.write_all(&head).await?;
    receiver.write_all(&body).await?;

    let mut frames = Vec::new();
    loop {
        let mut len = [0u8; 4];
        if sender.read_exact(&mut len).await.is_err() {
            return Ok(frames);
        }
        let mut body = vec![0u8; u32::from_be_bytes(len) as usize];
        sender.read_exact(&mut body).await?;

        let index = frames.len();
        frames.push(body.len());
        match fault {
            Fault::Flip { frame, offset } if frame == index => body[offset] ^= 0x01,
            Fault::Cut { frame } if frame == index => {
                receiver.write_all(&len).await?;
                receiver.write_all(&body[..body.len() / 2]).await?;
                return Ok(frames);
            }
            _ => {}
        }
        receiver.write_all(&len).await?;
        receiver.write_all(&body).await?;
    }
}

async fn run_transfer(source: Source, out: &Path, fault: Fault) -> Outcome {
    let keys = Arc::new(ReceiverKeyPair::generate());
    let progress = Arc::new(Mutex::new(Vec::new()));
    let seen = progress.clone();
    let receiver = Receiver::new(keys, out).with_progress(Box::new(move |done, _total, _name| {
        seen.lock().unwrap().push(done);
    }));

    let (mut a, relay_sender) = tokio::io::duplex(PIPE);
    let (relay_receiver, mut b) = tokio::io::duplex(PIPE);

    let send = async move {
        let result = match source {
            Source::File(path) => Sender::new().send_file(&mut a, &path).await.map(|_| ()),
            Source::Lying { manifest, data } => {
                Sender::new()
                    .send_reader(&mut a, &manifest, data.as_slice())
                    .await
            }
        };
        drop(a);
        result
    };
    let recv = async move {
        let result = receiver.receive(&mut b).await;
        drop(b);
        result
    };

    let (sent, received, frames) = tokio::join!(send, recv, relay(relay_sender, relay_receiver, fault));
    let progress = progress.lock().unwrap().clone();
    Outcome {
        sent,
        received,
        frames: frames.unwrap_or_default(),
        progress,
    }
}

#[tokio::test]
async fn small_file_roundtrip() {
    let tmp = TempDir::new().unwrap();
    let out = tmp.path().join("public");
    let original = b"hello sealed world, this file fits in a single chunk";
    let src = write_test_file(tmp.path(), "hello.txt", original);

    let outcome = run_transfer(Source::File(src), &out, Fault::None).await;
    outcome.sent.expect("send should succeed");
    let received = outcome.received.expect("receive should succeed");

    assert_eq!(received.path, out.join("hello.txt"));
    assert_eq!(received.manifest, Manifest::for_bytes("hello.txt", original));
    assert_eq!(std::fs::read(&received.path).unwrap(), original);
    assert_eq!(dir_entries(&out), vec!["hello.txt".to_string()]);
}

#[tokio::test]
async fn three_mib_file_uses_three_full_chunks() {
    let tmp = TempDir::new().unwrap();
    let out = tmp.path().join("public");
    let original = pattern(3 * MIB);
    let src = write_test_file(tmp.path(), "scenario.bin", &original);

    let outcome = run_transfer(Source::File(src), &out, Fault::None).await;
    outcome.sent.unwrap();
    let received = outcome.received.unwrap();

    // manifest frame, then three full chunk frames
    assert_eq!(outcome.frames.len(), 4);
    assert_eq!(&outcome.frames[1..], &[MIB + TAG; 3]);
    assert_eq!(outcome.progress, vec![MIB as u64, 2 * MIB as u64, 3 * MIB as u64]);

    let written = std::fs::read(&received.path).unwrap();
    assert_eq!(written.len(), 3 * MIB);
    assert_eq!(hex::encode(Sha256::digest(&written)), received.manifest.hash);
    assert_eq!(written, original);
}

#[tokio::test]
async fn empty_file_sends_no_chunks() {
    let tmp = TempDir::new().unwrap();
    let out = tmp.path().join("public");
    let src = write_test_file(tmp.path(), "empty", b"");

    let outcome = run_transfer(Source::File(src), &out, Fault::None).await;
    outcome.sent.unwrap();
    let received = outcome.received.unwrap();

    assert_eq!(outcome.frames.len(), 1, "manifest only");
    assert!(outcome.progress.is_empty());
    assert_eq!(received.manifest.size, 0);
    assert_eq!(std::fs::read(&received.path).unwrap(), b"");
}

#[tokio::test]
async fn chunk_boundary_sizes() {
    for (size, chunks, last) in [(MIB, 1, MIB), (MIB + 1, 2, 1), (MIB - 1, 1, MIB - 1)] {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("public");
        let original = pattern(size);
        let src = write_test_file(tmp.path(), "edge.bin", &original);

        let outcome = run_transfer(Source::File(src), &out, Fault::None).await;
        outcome.sent.unwrap();
        let received = outcome.received.unwrap();

        assert_eq!(outcome.frames.len(), 1 + chunks, "size {size}");
        assert_eq!(*outcome.frames.last().unwrap(), last + TAG, "size {size}");
        assert_eq!(std::fs::read(&received.path).unwrap(), original);
    }
}

#[tokio::test]
async fn tampered_chunk_is_rejected_without_output() {
    let tmp = TempDir::new().unwrap();
    let out = tmp.path().join("public");
    let src = write_test_file(tmp.path(), "data.bin", &pattern(2 * MIB + 100));

    let outcome = run_transfer(Source::File(src), &out, Fault::Flip { frame: 2, offset: 1000 }).await;

    assert!(matches!(
        outcome.received,
        Err(TransferError::Authentication { step: Step::Chunk(1) })
    ));
    assert!(dir_entries(&out).is_empty(), "no final or partial file: {:?}", dir_entries(&out));
}

#[tokio::test]
async fn tampered_tag_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let out = tmp.path().join("public");
    let src = write_test_file(tmp.path(), "data.bin", &pattern(5000));

    // last byte of the only chunk frame lives in the GCM tag
    let fault = Fault::Flip { frame: 1, offset: 5000 + TAG - 1 };
    let outcome = run_transfer(Source::File(src), &out, fault).await;

    assert!(matches!(
        outcome.received,
        Err(TransferError::Authentication { step: Step::Chunk(0) })
    ));
    assert!(dir_entries(&out).is_empty());
}

#[tokio::test]
async fn tampered_manifest_is_rejected_before_touching_disk() {
    let tmp = TempDir::new().unwrap();
    let out = tmp.path().join("public");
    let src = write_test_file(tmp.path(), "data.bin", b"payload");

    let outcome = run_transfer(Source::File(src), &out, Fault::Flip { frame: 0, offset: 3 }).await;

    assert!(matches!(
        outcome.received,
        Err(TransferError::Authentication { step: Step::Manifest })
    ));
    assert!(!out.exists(), "output directory is only created after the manifest verifies");
}

#[tokio::test]
async fn hash_mismatch_discards_partial_file() {
    let tmp = TempDir::new().unwrap();
    let out = tmp.path().join("public");
    let data = pattern(MIB + 10);
    let mut manifest = Manifest::for_bytes("claimed.bin", &data);
    // same size, digest of different content
    manifest.hash = hex::encode(Sha256::digest(b"something else"));
    let expected = manifest.hash.clone();

    let outcome = run_transfer(Source::Lying { manifest, data: data.clone() }, &out, Fault::None).await;

    outcome.sent.expect("sender cannot tell");
    match outcome.received {
        Err(TransferError::HashMismatch { expected: e, computed }) => {
            assert_eq!(e, expected);
            assert_eq!(computed, hex::encode(Sha256::digest(&data)));
        }
        other => panic!("expected hash mismatch, got {other:?}"),
    }
    assert!(dir_entries(&out).is_empty(), "left behind: {:?}", dir_entries(&out));
}

#[tokio::test]
async fn truncated_stream_is_framing_error() {
    let tmp = TempDir::new().unwrap();
    let out = tmp.path().join("public");
    let src = write_test_file(tmp.path(), "data.bin", &pattern(2 * MIB));

    let outcome = run_transfer(Source::File(src), &out, Fault::Cut { frame: 2 }).await;

    assert!(matches!(
        outcome.received,
        Err(TransferError::Framing { step: Step::Chunk(1), .. })
    ));
    assert!(dir_entries(&out).is_empty());
}

#[tokio::test]
async fn short_source_fails_both_sides() {
    let tmp = TempDir::new().unwrap();
    let out = tmp.path().join("public");
    let data = pattern(1000);
    let mut manifest = Manifest::for_bytes("short.bin", &data);
    manifest.size = 2000;

    let outcome = run_transfer(Source::Lying { manifest, data }, &out, Fault::None).await;

    assert!(matches!(outcome.sent, Err(TransferError::LocalIo { .. })));
    assert!(matches!(outcome.received, Err(TransferError::Framing { .. })));
    assert!(dir_entries(&out).is_empty());
}

#[tokio::test]
async fn long_source_is_stopped_by_sender() {
    let tmp = TempDir::new().unwrap();
    let out = tmp.path().join("public");
    let data = pattern(MIB + 500);
    let mut manifest = Manifest::for_bytes("long.bin", &data);
    manifest.size = MIB as u64 + 100;

    let outcome = run_transfer(Source::Lying { manifest, data }, &out, Fault::None).await;

    // chunk 0 fits the declared size; the connection ends before chunk 1
    assert!(matches!(outcome.sent, Err(TransferError::LocalIo { .. })));
    assert!(matches!(
        outcome.received,
        Err(TransferError::Framing { step: Step::Chunk(1), .. })
    ));
    assert_eq!(outcome.frames.len(), 2);
    assert_eq!(outcome.frames[1], MIB + TAG);
    assert!(dir_entries(&out).is_empty());
}

#[tokio::test]
async fn existing_destination_is_replaced() {
    let tmp = TempDir::new().unwrap();
    let out = tmp.path().join("public");
    std::fs::create_dir_all(&out).unwrap();
    std::fs::write(out.join("notes.txt"), b"stale contents").unwrap();
    let src = write_test_file(tmp.path(), "notes.txt", b"fresh contents");

    let outcome = run_transfer(Source::File(src), &out, Fault::None).await;
    let received = outcome.received.unwrap();

    assert_eq!(std::fs::read(received.path).unwrap(), b"fresh contents");
    assert_eq!(dir_entries(&out), vec!["notes.txt".to_string()]);
}

#[tokio::test]
async fn concurrent_sessions_share_one_key_pair() {
    let tmp = TempDir::new().unwrap();
    let out = tmp.path().join("public");
    let receiver = Receiver::new(Arc::new(ReceiverKeyPair::generate()), &out);

    let mut tasks = Vec::new();
    for i in 0..4usize {
        let content = pattern(100_000 + i * 7919);
        let src = write_test_file(tmp.path(), &format!("file-{i}.bin"), &content);
        let receiver = receiver.clone();
        tasks.push(tokio::spawn(async move {
            let (mut a, mut b) = tokio::io::duplex(PIPE);
            let (sent, received) = tokio::join!(
                async move { Sender::new().send_file(&mut a, &src).await },
                async move { receiver.receive(&mut b).await },
            );
            (sent.unwrap(), received.unwrap(), content)
        }));
    }

    for task in tasks {
        let (sent, received, content) = task.await.unwrap();
        assert_eq!(sent, received.manifest);
        assert_eq!(std::fs::read(&received.path).unwrap(), content);
    }
    assert_eq!(dir_entries(&out).len(), 4);
}
