fn main() {
    println!("Run `cargo test -p transfer-e2e` to execute end-to-end transfer tests.");
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};
    use tokio_util::sync::CancellationToken;

    use chunkferry_codec::TransferKey;
    use chunkferry_config::TransferConfig;
    use chunkferry_protocol::frames::{read_frame, write_frame, Frame};
    use chunkferry_protocol::manifest::ChunkEntry;
    use chunkferry_protocol::{max_frame_len, Manifest, Priority};
    use chunkferry_sched::{JobQueue, JobState, TransferJob};
    use chunkferry_store::{chunk_file_name, prepare_file, ChunkStore};
    use chunkferry_transfer::{run_queue, send_job, ReceiverServer, StatusWriter, TransferError};
    use chunkferry_protocol::status::Role;

    fn test_key() -> TransferKey {
        TransferKey::from_bytes(*b"0123456789abcdef")
    }

    fn test_config(status_dir: &Path, chunk_size: u32) -> TransferConfig {
        let mut config = TransferConfig::default();
        config.transfer.chunk_size = chunk_size;
        config.network.connect_timeout_secs = 5;
        config.network.ack_timeout_secs = 5;
        config.monitoring.status_dir = status_dir.to_path_buf();
        config
    }

    /// Deterministic non-uniform payload so compression has work to do
    /// and chunk boundaries carry different bytes.
    fn payload(len: usize) -> Vec<u8> {
        (0..len)
            .map(|i| ((i * 31 + i / 997) % 251) as u8)
            .collect()
    }

    struct Receiver {
        addr: SocketAddr,
        incoming: PathBuf,
        output: PathBuf,
        cancel: CancellationToken,
    }

    impl Drop for Receiver {
        fn drop(&mut self) {
            self.cancel.cancel();
        }
    }

    async fn start_receiver(dir: &Path, config: TransferConfig) -> Receiver {
        let incoming = dir.join("incoming");
        let output = dir.join("received");
        std::fs::create_dir_all(&incoming).unwrap();
        std::fs::create_dir_all(&output).unwrap();

        let server = ReceiverServer::new(&incoming, &output, test_key(), config);
        let cancel = server.cancel_token();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = server.serve_on(listener).await;
        });

        Receiver {
            addr,
            incoming,
            output,
            cancel,
        }
    }

    fn stage_file(dir: &Path, name: &str, data: &[u8], config: &TransferConfig) -> TransferJob {
        let src = dir.join(name);
        std::fs::write(&src, data).unwrap();
        let chunk_dir = dir.join(format!("staging/{name}.chunks"));
        let store = ChunkStore::at(&chunk_dir).unwrap();
        let manifest = prepare_file(
            &src,
            &store,
            config.transfer.chunk_size,
            &test_key(),
            Priority::Normal,
            config.compression.enabled,
            config.compression.level,
        )
        .unwrap();
        TransferJob::new(manifest, chunk_dir)
    }

    #[tokio::test]
    async fn full_transfer_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), 1_000_000);
        let receiver = start_receiver(dir.path(), config.clone()).await;

        let data = payload(2_500_000);
        let mut job = stage_file(dir.path(), "round_trip.bin", &data, &config);
        assert_eq!(job.manifest.chunk_count, 3);

        let status = StatusWriter::new(dir.path(), Role::Sender);
        let cancel = CancellationToken::new();
        send_job(
            &receiver.addr.to_string(),
            &mut job,
            &config,
            &status,
            &cancel,
        )
        .await
        .unwrap();

        assert_eq!(job.state, JobState::Completed);
        let restored = std::fs::read(receiver.output.join("round_trip.bin")).unwrap();
        assert_eq!(restored, data);
    }

    #[tokio::test]
    async fn empty_file_transfers_manifest_only() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), 1_000_000);
        let receiver = start_receiver(dir.path(), config.clone()).await;

        let mut job = stage_file(dir.path(), "empty.bin", &[], &config);
        assert_eq!(job.manifest.chunk_count, 0);

        let status = StatusWriter::new(dir.path(), Role::Sender);
        let cancel = CancellationToken::new();
        send_job(
            &receiver.addr.to_string(),
            &mut job,
            &config,
            &status,
            &cancel,
        )
        .await
        .unwrap();

        let restored = std::fs::read(receiver.output.join("empty.bin")).unwrap();
        assert!(restored.is_empty());
    }

    /// Sender dies after chunk 0 was persisted; the next attempt must
    /// learn `{0}` from the receiver and send only chunks 1 and 2.
    #[tokio::test]
    async fn resume_after_interrupted_session() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), 1_000_000);
        let receiver = start_receiver(dir.path(), config.clone()).await;

        let data = payload(2_500_000);
        let mut job = stage_file(dir.path(), "resume.bin", &data, &config);

        // First attempt: speak the protocol by hand and hang up right
        // after chunk 0 is acknowledged.
        let max_payload = max_frame_len(config.transfer.chunk_size);
        let sender_store = ChunkStore::at(&job.chunk_dir).unwrap();
        {
            let mut stream = TcpStream::connect(receiver.addr).await.unwrap();
            write_frame(&mut stream, &Frame::Manifest(job.manifest.clone()))
                .await
                .unwrap();
            let held = read_frame(&mut stream, max_payload).await.unwrap();
            assert_eq!(held, Frame::HeldSet(vec![]));

            let (nonce, ciphertext) = sender_store.read_chunk(0).unwrap();
            write_frame(
                &mut stream,
                &Frame::Chunk {
                    index: 0,
                    nonce,
                    ciphertext,
                },
            )
            .await
            .unwrap();
            let ack = read_frame(&mut stream, max_payload).await.unwrap();
            assert_eq!(
                ack,
                Frame::ChunkAck {
                    index: 0,
                    accepted: true
                }
            );
            // Connection dropped here, mid-transfer.
        }
        // Let the receiver notice the hangup and release the file.
        tokio::time::sleep(Duration::from_millis(100)).await;

        // The receiver derived the held set from disk, not memory:
        // a fresh connection is told chunk 0 is already there.
        {
            let mut stream = TcpStream::connect(receiver.addr).await.unwrap();
            write_frame(&mut stream, &Frame::Manifest(job.manifest.clone()))
                .await
                .unwrap();
            let held = read_frame(&mut stream, max_payload).await.unwrap();
            assert_eq!(held, Frame::HeldSet(vec![0]));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Second attempt through the real sender completes the file.
        let status = StatusWriter::new(dir.path(), Role::Sender);
        let cancel = CancellationToken::new();
        send_job(
            &receiver.addr.to_string(),
            &mut job,
            &config,
            &status,
            &cancel,
        )
        .await
        .unwrap();

        let restored = std::fs::read(receiver.output.join("resume.bin")).unwrap();
        assert_eq!(restored, data);
    }

    /// An artifact that no longer hash-matches the manifest is not in
    /// the held set, and the file still completes on retransfer.
    #[tokio::test]
    async fn corrupt_artifact_is_retransferred() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), 64 * 1024);
        let receiver = start_receiver(dir.path(), config.clone()).await;

        let data = payload(200_000);
        let mut job = stage_file(dir.path(), "corrupt.bin", &data, &config);

        let status = StatusWriter::new(dir.path(), Role::Sender);
        let cancel = CancellationToken::new();
        let addr = receiver.addr.to_string();
        send_job(&addr, &mut job, &config, &status, &cancel)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;

        // Corrupt one persisted artifact and delete the restored file.
        let artifact = receiver
            .incoming
            .join("corrupt.bin.chunks")
            .join(chunk_file_name(1));
        let mut bytes = std::fs::read(&artifact).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        std::fs::write(&artifact, bytes).unwrap();
        std::fs::remove_file(receiver.output.join("corrupt.bin")).unwrap();

        // Re-send: held set must exclude chunk 1, and the fresh copy
        // must overwrite the corrupt artifact.
        job.state = JobState::Pending;
        send_job(&addr, &mut job, &config, &status, &cancel)
            .await
            .unwrap();

        let restored = std::fs::read(receiver.output.join("corrupt.bin")).unwrap();
        assert_eq!(restored, data);
    }

    /// A chunk whose ciphertext was tampered in flight is rejected and
    /// accepted once re-sent intact.
    #[tokio::test]
    async fn tampered_chunk_rejected_then_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), 64 * 1024);
        let receiver = start_receiver(dir.path(), config.clone()).await;

        let data = payload(10_000);
        let job = stage_file(dir.path(), "tamper.bin", &data, &config);
        let store = ChunkStore::at(&job.chunk_dir).unwrap();
        let max_payload = max_frame_len(config.transfer.chunk_size);

        let mut stream = TcpStream::connect(receiver.addr).await.unwrap();
        write_frame(&mut stream, &Frame::Manifest(job.manifest.clone()))
            .await
            .unwrap();
        read_frame(&mut stream, max_payload).await.unwrap();

        let (nonce, ciphertext) = store.read_chunk(0).unwrap();
        let mut tampered = ciphertext.clone();
        tampered[0] ^= 0x80;
        write_frame(
            &mut stream,
            &Frame::Chunk {
                index: 0,
                nonce,
                ciphertext: tampered,
            },
        )
        .await
        .unwrap();
        assert_eq!(
            read_frame(&mut stream, max_payload).await.unwrap(),
            Frame::ChunkAck {
                index: 0,
                accepted: false
            }
        );

        // Intact re-send on the same connection goes through.
        write_frame(
            &mut stream,
            &Frame::Chunk {
                index: 0,
                nonce,
                ciphertext,
            },
        )
        .await
        .unwrap();
        assert_eq!(
            read_frame(&mut stream, max_payload).await.unwrap(),
            Frame::ChunkAck {
                index: 0,
                accepted: true
            }
        );
    }

    #[tokio::test]
    async fn malformed_manifest_drops_connection() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), 64 * 1024);
        let receiver = start_receiver(dir.path(), config.clone()).await;

        let mut stream = TcpStream::connect(receiver.addr).await.unwrap();
        // Manifest frame carrying JSON that is not a manifest.
        use tokio::io::AsyncWriteExt;
        let garbage = br#"{"not": "a manifest"}"#;
        stream.write_u8(0x01).await.unwrap();
        stream.write_u32(garbage.len() as u32).await.unwrap();
        stream.write_all(garbage).await.unwrap();
        stream.flush().await.unwrap();

        // No held set comes back; the connection just closes.
        let mut buf = [0u8; 1];
        let n = stream.read(&mut buf).await.unwrap_or(0);
        assert_eq!(n, 0);
    }

    /// A structurally invalid manifest (declared chunk count disagrees
    /// with the descriptors) is rejected before any chunk exchange.
    #[tokio::test]
    async fn inconsistent_manifest_rejected_before_exchange() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), 64 * 1024);
        let receiver = start_receiver(dir.path(), config.clone()).await;

        let job = stage_file(dir.path(), "bad_count.bin", &payload(10_000), &config);
        let mut manifest = job.manifest.clone();
        manifest.chunk_count += 1;

        let mut stream = TcpStream::connect(receiver.addr).await.unwrap();
        write_frame(&mut stream, &Frame::Manifest(manifest))
            .await
            .unwrap();

        let mut buf = [0u8; 1];
        let n = stream.read(&mut buf).await.unwrap_or(0);
        assert_eq!(n, 0);
        // Nothing was persisted for the rejected session.
        assert!(!receiver.incoming.join("bad_count.bin.chunks").exists());
    }

    /// Queue drains strictly by priority regardless of enqueue order.
    #[tokio::test]
    async fn queue_services_jobs_by_priority() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), 64 * 1024);
        let receiver = start_receiver(dir.path(), config.clone()).await;

        let mut queue = JobQueue::new();
        for (name, priority) in [
            ("low.bin", Priority::Low),
            ("critical.bin", Priority::Critical),
            ("normal.bin", Priority::Normal),
        ] {
            let src = dir.path().join(name);
            std::fs::write(&src, payload(5_000)).unwrap();
            let chunk_dir = dir.path().join(format!("staging/{name}.chunks"));
            let store = ChunkStore::at(&chunk_dir).unwrap();
            let manifest = prepare_file(
                &src,
                &store,
                config.transfer.chunk_size,
                &test_key(),
                priority,
                true,
                3,
            )
            .unwrap();
            queue.enqueue(TransferJob::new(manifest, chunk_dir));
        }

        let status = StatusWriter::new(dir.path(), Role::Sender);
        let cancel = CancellationToken::new();
        let reports = run_queue(
            &receiver.addr.to_string(),
            queue,
            &config,
            &status,
            &cancel,
        )
        .await;

        let order: Vec<&str> = reports.iter().map(|r| r.file_name.as_str()).collect();
        assert_eq!(order, ["critical.bin", "normal.bin", "low.bin"]);
        assert!(reports.iter().all(|r| r.succeeded()));
        for name in ["critical.bin", "normal.bin", "low.bin"] {
            assert!(receiver.output.join(name).exists());
        }
    }

    // Scripted peers for driving the sender's retry paths directly.

    async fn expect_chunk(stream: &mut TcpStream, max_payload: usize) -> u32 {
        match read_frame(stream, max_payload).await.unwrap() {
            Frame::Chunk { index, .. } => index,
            other => panic!("expected chunk, got {other:?}"),
        }
    }

    async fn expect_manifest(stream: &mut TcpStream, max_payload: usize) -> Manifest {
        match read_frame(stream, max_payload).await.unwrap() {
            Frame::Manifest(manifest) => manifest,
            other => panic!("expected manifest, got {other:?}"),
        }
    }

    fn success_verdict(manifest: &Manifest) -> Frame {
        let mut hash = [0u8; 32];
        hex::decode_to_slice(&manifest.original_hash, &mut hash).unwrap();
        Frame::FinalVerdict {
            success: true,
            expected_hash: hash,
            computed_hash: hash,
        }
    }

    /// An ack that arrives after the sender's timeout is just late,
    /// not lost: the duplicate it leaves queued on the stream must not
    /// fail the job as a protocol violation.
    #[tokio::test]
    async fn late_ack_does_not_fail_the_job() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path(), 64 * 1024);
        config.network.ack_timeout_secs = 1;

        let data = payload(100_000); // two chunks
        let mut job = stage_file(dir.path(), "late_ack.bin", &data, &config);
        assert_eq!(job.manifest.chunk_count, 2);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let max_payload = max_frame_len(config.transfer.chunk_size);

        let peer = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let manifest = expect_manifest(&mut stream, max_payload).await;
            write_frame(&mut stream, &Frame::HeldSet(vec![])).await.unwrap();

            // Hold the first ack past the sender's timeout, then ack
            // both the original send and the re-send.
            assert_eq!(expect_chunk(&mut stream, max_payload).await, 0);
            tokio::time::sleep(Duration::from_millis(1500)).await;
            let ack0 = Frame::ChunkAck {
                index: 0,
                accepted: true,
            };
            write_frame(&mut stream, &ack0).await.unwrap();
            assert_eq!(expect_chunk(&mut stream, max_payload).await, 0);
            write_frame(&mut stream, &ack0).await.unwrap();

            assert_eq!(expect_chunk(&mut stream, max_payload).await, 1);
            write_frame(
                &mut stream,
                &Frame::ChunkAck {
                    index: 1,
                    accepted: true,
                },
            )
            .await
            .unwrap();

            write_frame(&mut stream, &success_verdict(&manifest))
                .await
                .unwrap();
        });

        let status = StatusWriter::new(dir.path(), Role::Sender);
        let cancel = CancellationToken::new();
        send_job(&addr.to_string(), &mut job, &config, &status, &cancel)
            .await
            .unwrap();
        assert_eq!(job.state, JobState::Completed);
        peer.await.unwrap();
    }

    /// A rejected chunk is re-sent by the sender itself, within the
    /// same connection.
    #[tokio::test]
    async fn rejected_chunk_is_resent_by_sender() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), 64 * 1024);

        let mut job = stage_file(dir.path(), "reject_once.bin", &payload(10_000), &config);
        assert_eq!(job.manifest.chunk_count, 1);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let max_payload = max_frame_len(config.transfer.chunk_size);

        let peer = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let manifest = expect_manifest(&mut stream, max_payload).await;
            write_frame(&mut stream, &Frame::HeldSet(vec![])).await.unwrap();

            assert_eq!(expect_chunk(&mut stream, max_payload).await, 0);
            write_frame(
                &mut stream,
                &Frame::ChunkAck {
                    index: 0,
                    accepted: false,
                },
            )
            .await
            .unwrap();

            assert_eq!(expect_chunk(&mut stream, max_payload).await, 0);
            write_frame(
                &mut stream,
                &Frame::ChunkAck {
                    index: 0,
                    accepted: true,
                },
            )
            .await
            .unwrap();

            write_frame(&mut stream, &success_verdict(&manifest))
                .await
                .unwrap();
        });

        let status = StatusWriter::new(dir.path(), Role::Sender);
        let cancel = CancellationToken::new();
        send_job(&addr.to_string(), &mut job, &config, &status, &cancel)
            .await
            .unwrap();
        assert_eq!(job.state, JobState::Completed);
        peer.await.unwrap();
    }

    /// A chunk rejected on every attempt exhausts the per-chunk bound
    /// and fails the job with a retryable error.
    #[tokio::test]
    async fn always_rejected_chunk_exhausts_retries() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), 64 * 1024);
        let max_retries = config.transfer.max_retries;

        let mut job = stage_file(dir.path(), "reject_all.bin", &payload(10_000), &config);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let max_payload = max_frame_len(config.transfer.chunk_size);

        let peer = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            expect_manifest(&mut stream, max_payload).await;
            write_frame(&mut stream, &Frame::HeldSet(vec![])).await.unwrap();

            for _ in 0..max_retries {
                assert_eq!(expect_chunk(&mut stream, max_payload).await, 0);
                write_frame(
                    &mut stream,
                    &Frame::ChunkAck {
                        index: 0,
                        accepted: false,
                    },
                )
                .await
                .unwrap();
            }
        });

        let status = StatusWriter::new(dir.path(), Role::Sender);
        let cancel = CancellationToken::new();
        let err = send_job(&addr.to_string(), &mut job, &config, &status, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TransferError::ChunkExhausted {
                index: 0,
                attempts
            } if attempts == max_retries
        ));
        assert!(err.is_retryable());
        assert!(matches!(job.state, JobState::Failed(_)));
        peer.await.unwrap();
    }

    /// A manifest declaring an absurd chunk size must not raise the
    /// receiver's frame cap with it.
    #[tokio::test]
    async fn huge_declared_chunk_size_cannot_inflate_frames() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), 64 * 1024);
        let receiver = start_receiver(dir.path(), config.clone()).await;

        let manifest = Manifest::build(
            "huge.bin".into(),
            10,
            "aa".repeat(32),
            u32::MAX,
            Priority::Normal,
            true,
            vec![ChunkEntry {
                index: 0,
                plain_size: 10,
                plain_hash: "ab".repeat(32),
                encrypted_size: 26,
                encrypted_hash: "cd".repeat(32),
            }],
        );

        let mut stream = TcpStream::connect(receiver.addr).await.unwrap();
        write_frame(&mut stream, &Frame::Manifest(manifest))
            .await
            .unwrap();
        let held = read_frame(&mut stream, max_frame_len(config.transfer.chunk_size))
            .await
            .unwrap();
        assert_eq!(held, Frame::HeldSet(vec![]));

        // A chunk frame header demanding 32 MiB exceeds the cap the
        // receiver derives from its own configuration; the connection
        // is dropped before any payload is read.
        use tokio::io::AsyncWriteExt;
        stream.write_u8(0x03).await.unwrap();
        stream.write_u32(32 * 1024 * 1024).await.unwrap();
        stream.flush().await.unwrap();

        let mut buf = [0u8; 1];
        let n = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf))
            .await
            .expect("receiver did not close the connection")
            .unwrap_or(0);
        assert_eq!(n, 0);
    }
}
