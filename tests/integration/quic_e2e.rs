//! tests/integration/quic_e2e.rs
//!
//! End-to-end coverage over the real QUIC transport (as opposed to the
//! in-process `LoopbackTransport` the unit tests use): two nodes with
//! independent identities, real TLS certificates from a shared CA, run
//! the reverse-auth handshake and a gossip fan-out over actual sockets.

use crate::common::harness::{cert_dir, ephemeral_addr, generate_certs};
use meshcomms::auth::{Ping, RpcRequest, RpcResponse};
use meshcomms::comms::Comms;
use meshcomms::gossip::{self, GossipMsg};
use meshcomms::host::{Host, HostParams};
use meshcomms::identity::{Identity, Role};
use meshcomms::transport::quic::QuicTransport;
use meshcomms::transport::Transport;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use test_log::test;
use tokio_util::sync::CancellationToken;

#[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn two_real_quic_nodes_handshake_and_gossip() {
    let outcome = tokio::time::timeout(Duration::from_secs(15), async {
        let certs = generate_certs("localhost");

        let (_a_dir, a_ca, a_cert, a_key) = cert_dir(&certs).unwrap();
        let (_b_dir, b_ca, b_cert, b_key) = cert_dir(&certs).unwrap();

        let a_transport =
            QuicTransport::new(ephemeral_addr(), &a_ca, &a_cert, &a_key, false).unwrap();
        let b_transport =
            QuicTransport::new(ephemeral_addr(), &b_ca, &b_cert, &b_key, false).unwrap();
        let a_addr = a_transport.local_addr().unwrap();
        let b_addr = b_transport.local_addr().unwrap();

        let a_identity = Arc::new(Identity::new(Role::Node));
        let b_identity = Arc::new(Identity::new(Role::Node));

        let comms_a = Arc::new(Comms::new_server(
            a_identity.clone(),
            Arc::new(a_transport) as Arc<dyn Transport>,
            false,
            gossip::ManagerFlags::default(),
            Duration::from_secs(10),
        ));
        let comms_b = Arc::new(Comms::new_server(
            b_identity.clone(),
            Arc::new(b_transport) as Arc<dyn Transport>,
            false,
            gossip::ManagerFlags::default(),
            Duration::from_secs(10),
        ));

        // Each side pre-registers the other as a static Host so neither
        // needs dynamic-auth's salted-ID derivation (see auth::tests).
        comms_a.manager.add_host(Arc::new(
            Host::new(
                b_identity.node_id,
                b_addr.to_string(),
                Vec::new(),
                Some(b_identity.public_key_bytes()),
                HostParams::default(),
                false,
                true,
            )
            .unwrap(),
        ));
        comms_b.manager.add_host(Arc::new(
            Host::new(
                a_identity.node_id,
                a_addr.to_string(),
                Vec::new(),
                Some(a_identity.public_key_bytes()),
                HostParams::default(),
                false,
                true,
            )
            .unwrap(),
        ));

        let shutdown = CancellationToken::new();
        comms_a.serve(shutdown.clone());
        comms_b.serve(shutdown.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;

        let host_to_b = Host::new(
            b_identity.node_id,
            b_addr.to_string(),
            Vec::new(),
            Some(b_identity.public_key_bytes()),
            HostParams::default(),
            false,
            true,
        )
        .unwrap();

        // --- Reverse-auth handshake over real QUIC ---
        let request = bincode::serialize(&RpcRequest::RequestToken(Ping::default())).unwrap();
        let reply = comms_a
            .send(&host_to_b, |conn| async move { conn.open_request(request).await })
            .await
            .expect("handshake + RequestToken call should succeed over real QUIC");
        let response: RpcResponse = bincode::deserialize(&reply).unwrap();
        assert!(matches!(response, RpcResponse::AssignToken(_)));
        assert!(host_to_b.transmission_token().has());

        // --- Gossip fan-out over the same authenticated connection ---
        let delivered = Arc::new(AtomicU32::new(0));
        let counter = delivered.clone();
        comms_b
            .gossip
            .new_gossip(
                "cluster-events",
                vec![],
                Arc::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
                Arc::new(|_| Ok(())),
            )
            .await;

        let msg = GossipMsg {
            tag: "cluster-events".to_string(),
            origin: a_identity.node_id.marshal(),
            payload: b"node-joined".to_vec(),
            signature: Vec::new(),
        };
        let mut stream = comms_a.stream(&host_to_b).await.unwrap();
        stream.send(&bincode::serialize(&msg).unwrap()).await.unwrap();
        stream.finish().await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(delivered.load(Ordering::SeqCst), 1);

        shutdown.cancel();
    })
    .await;

    assert!(outcome.is_ok(), "end-to-end QUIC test timed out");
}
