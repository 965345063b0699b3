//! Registry and wire behaviour against live loopback sockets.

mod common;

use std::collections::HashSet;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpSocket, TcpStream};

use common::*;
use murmur::constants::wire::PROTOCOL_VERSION;
use murmur::{Frame, Message, NetworkerConfig, PeerAddr, PeerError};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_attach_and_delete_keep_ids_unique() {
    let net = started_networker(NetworkerConfig {
        listen: false,
        ..test_config("attach")
    })
    .await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    // Keep the client halves alive for the whole test
    let mut clients = Vec::new();
    let mut attaches = Vec::new();
    for _ in 0..16 {
        clients.push(TcpStream::connect(addr).await.unwrap());
        let (server, _) = listener.accept().await.unwrap();
        let net = net.clone();
        attaches.push(tokio::spawn(async move { net.peer_attach(server) }));
    }
    let mut ids = HashSet::new();
    for handle in attaches {
        assert!(ids.insert(handle.await.unwrap().unwrap()));
    }
    assert_eq!(ids, (0..16).collect::<HashSet<_>>());
    assert_eq!(net.peer_count(), 16);

    // Delete the even ids from several tasks while attaching more
    let mut work = Vec::new();
    for id in (0..16).step_by(2) {
        let net = net.clone();
        work.push(tokio::spawn(async move {
            assert!(net.peer_del(id));
        }));
    }
    for handle in work {
        handle.await.unwrap();
    }
    assert!(wait_until(|| net.peer_count() == 8).await);

    let mut attaches = Vec::new();
    for _ in 0..4 {
        clients.push(TcpStream::connect(addr).await.unwrap());
        let (server, _) = listener.accept().await.unwrap();
        let net = net.clone();
        attaches.push(tokio::spawn(async move { net.peer_attach(server) }));
    }
    for handle in attaches {
        handle.await.unwrap().unwrap();
    }

    let ids = net.peer_ids();
    assert_eq!(ids.len(), 12);
    assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 12);
    // New peers took the lowest free ids
    assert!(ids.iter().filter(|id| **id % 2 == 0).all(|id| *id < 8));

    net.stop();
    tokio::time::timeout(WAIT, net.join()).await.unwrap();
    assert_eq!(net.peer_count(), 0);
}

#[tokio::test]
async fn test_unknown_tag_gets_malformed_reply_from_node() {
    let net = started_networker(test_config("malformed")).await;
    let mut raw = RawPeer::connect(&net.local_listen_addr().unwrap()).await;

    let hello = raw.expect(|f| matches!(f, Frame::Hello { .. })).await;
    assert_eq!(
        hello,
        Some(Frame::Hello {
            version: PROTOCOL_VERSION
        })
    );

    raw.send(&[0xEE, 1, 2, 3]).await;
    assert_eq!(
        raw.expect(|f| matches!(f, Frame::Malformed(_))).await,
        Some(Frame::Malformed(4))
    );

    // The connection survives and keeps working
    raw.send_frame(&Frame::Hello { version: 9 }).await;
    assert!(wait_until(|| net.peer(0).and_then(|p| p.version()) == Some(9)).await);
    assert_eq!(net.peer_count(), 1);

    net.stop();
    tokio::time::timeout(WAIT, net.join()).await.unwrap();
}

#[tokio::test]
async fn test_message_frame_is_acked_and_published() {
    let net = started_networker(test_config("ack")).await;
    let mut events = net.take_events().unwrap();
    let mut raw = RawPeer::connect(&net.local_listen_addr().unwrap()).await;

    let message = Message::new("news", b"payload".to_vec(), 120).unwrap();
    let encoded = message.encode().unwrap();
    raw.send_frame(&Frame::Message(encoded.clone().into())).await;

    assert_eq!(
        raw.expect(|f| matches!(f, Frame::MessageAck(_))).await,
        Some(Frame::MessageAck(encoded.len() as u16))
    );
    match tokio::time::timeout(WAIT, events.recv()).await.unwrap() {
        Some(murmur::NetworkEvent::Message { payload, .. }) => {
            assert_eq!(Message::decode(&payload).unwrap(), message);
        }
        other => panic!("expected a message event, got {:?}", other),
    }

    net.stop();
    tokio::time::timeout(WAIT, net.join()).await.unwrap();
}

#[tokio::test]
async fn test_goodbye_removes_peer() {
    let net = started_networker(test_config("goodbye")).await;
    let mut raw = RawPeer::connect(&net.local_listen_addr().unwrap()).await;
    assert!(wait_until(|| net.peer_count() == 1).await);

    raw.send_frame(&Frame::Goodbye).await;
    assert_eq!(
        raw.expect(|f| *f == Frame::Goodbye).await,
        Some(Frame::Goodbye)
    );
    assert!(raw.closed().await);
    assert!(wait_until(|| net.peer_count() == 0).await);

    net.stop();
    tokio::time::timeout(WAIT, net.join()).await.unwrap();
}

#[tokio::test]
async fn test_advertise_records_listen_address_and_blocks_duplicates() {
    let a = started_networker(test_config("a")).await;
    let b = started_networker(test_config("b")).await;
    let a_addr = a.local_listen_addr().unwrap();
    let b_addr = b.local_listen_addr().unwrap();

    b.peer_add(a_addr.clone()).await.unwrap();
    assert!(
        wait_until(|| {
            a.table()
                .snapshot()
                .iter()
                .any(|p| p.listen_addr().as_ref() == Some(&b_addr))
        })
        .await
    );

    assert!(matches!(
        b.peer_add(a_addr.clone()).await,
        Err(PeerError::AlreadyConnected(_))
    ));
    assert!(!b.add_candidate(a_addr));

    for net in [&a, &b] {
        net.stop();
        tokio::time::timeout(WAIT, net.join()).await.unwrap();
    }
}

#[tokio::test]
async fn test_requestpeer_shares_another_peer() {
    let hub = started_networker(test_config("hub")).await;
    let spoke = started_networker(test_config("spoke")).await;
    let hub_addr = hub.local_listen_addr().unwrap();
    let spoke_addr = spoke.local_listen_addr().unwrap();

    spoke.peer_add(hub_addr.clone()).await.unwrap();
    assert!(
        wait_until(|| hub.table().listen_addrs().contains(&spoke_addr)).await
    );

    let mut raw = RawPeer::connect(&hub_addr).await;
    raw.send_frame(&Frame::RequestPeer).await;
    assert_eq!(
        raw.expect(|f| matches!(f, Frame::SharePeer(_))).await,
        Some(Frame::SharePeer(spoke_addr))
    );

    for net in [&hub, &spoke] {
        net.stop();
        tokio::time::timeout(WAIT, net.join()).await.unwrap();
    }
}

#[tokio::test]
async fn test_requestpeer_without_addresses_gets_no_reply() {
    let net = started_networker(test_config("lonely")).await;
    let mut raw = RawPeer::connect(&net.local_listen_addr().unwrap()).await;
    assert!(wait_until(|| net.peer_count() == 1).await);

    // The only peer is the asker, and it never advertised
    raw.send_frame(&Frame::RequestPeer).await;
    let reply = raw
        .expect_within(Duration::from_millis(500), |f| {
            matches!(f, Frame::SharePeer(_))
        })
        .await;
    assert_eq!(reply, None);
    assert_eq!(net.peer_count(), 1);

    net.stop();
    tokio::time::timeout(WAIT, net.join()).await.unwrap();
}

#[tokio::test]
async fn test_advertising_a_taken_address_drops_the_link() {
    let hub = started_networker(test_config("hub")).await;
    let spoke = started_networker(test_config("spoke")).await;
    let hub_addr = hub.local_listen_addr().unwrap();
    let spoke_addr = spoke.local_listen_addr().unwrap();

    spoke.peer_add(hub_addr.clone()).await.unwrap();
    assert!(wait_until(|| hub.table().listen_addrs().contains(&spoke_addr)).await);

    let mut raw = RawPeer::connect(&hub_addr).await;
    assert!(wait_until(|| hub.peer_count() == 2).await);
    raw.send_frame(&Frame::Advertise {
        host: spoke_addr.host.clone(),
        port: spoke_addr.port,
    })
    .await;

    assert_eq!(
        raw.expect(|f| *f == Frame::Goodbye).await,
        Some(Frame::Goodbye)
    );
    assert!(raw.closed().await);
    assert!(wait_until(|| hub.peer_count() == 1).await);
    // The original link keeps its address
    assert_eq!(hub.table().listen_addrs(), vec![spoke_addr]);

    for net in [&hub, &spoke] {
        net.stop();
        tokio::time::timeout(WAIT, net.join()).await.unwrap();
    }
}

/// A listener whose accept queue is full: further connects hang.
async fn unresponsive_listener() -> (TcpListener, Vec<TcpStream>, PeerAddr) {
    let socket = TcpSocket::new_v4().unwrap();
    socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let listener = socket.listen(1).unwrap();
    let addr = listener.local_addr().unwrap();

    let mut fillers = Vec::new();
    for _ in 0..8 {
        match tokio::time::timeout(Duration::from_millis(200), TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => fillers.push(stream),
            _ => break,
        }
    }
    (listener, fillers, PeerAddr::from(addr))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_hanging_candidate_dial_does_not_stall_dispatch() {
    let (_listener, _fillers, hanging) = unresponsive_listener().await;
    let net = started_networker(NetworkerConfig {
        connect_timeout: Duration::from_secs(4),
        ..test_config("dialer")
    })
    .await;
    let mut raw = RawPeer::connect(&net.local_listen_addr().unwrap()).await;
    assert!(wait_until(|| net.peer_count() == 1).await);

    // One peer is under-integrated, so the candidate is dialed right away
    raw.send_frame(&Frame::SharePeer(hanging.clone())).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let encoded = Message::new("", b"still here".to_vec(), 120)
        .unwrap()
        .encode()
        .unwrap();
    let sent = Instant::now();
    raw.send_frame(&Frame::Message(encoded.clone().into())).await;
    assert_eq!(
        raw.expect(|f| matches!(f, Frame::MessageAck(_))).await,
        Some(Frame::MessageAck(encoded.len() as u16))
    );
    assert!(sent.elapsed() < Duration::from_secs(1));
    assert!(net.candidates().contains(&hanging));

    // Stopping does not wait for the dial either
    let stopping = Instant::now();
    net.stop();
    tokio::time::timeout(WAIT, net.join()).await.unwrap();
    assert!(stopping.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_sharepeer_feeds_integration() {
    let a = started_networker(test_config("learner")).await;
    let b = started_networker(test_config("target")).await;
    let b_addr = b.local_listen_addr().unwrap();

    // A hears about B from a stranger and dials it on its own
    let mut raw = RawPeer::connect(&a.local_listen_addr().unwrap()).await;
    raw.send_frame(&Frame::SharePeer(b_addr.clone())).await;

    assert!(wait_until(|| a.table().listen_addrs().contains(&b_addr)).await);
    assert!(wait_until(|| !a.candidates().contains(&b_addr)).await);
    assert!(wait_until(|| b.peer_count() == 1).await);

    for net in [&a, &b] {
        net.stop();
        tokio::time::timeout(WAIT, net.join()).await.unwrap();
    }
}

#[tokio::test]
async fn test_inbound_beyond_max_clients_is_refused() {
    let net = started_networker(NetworkerConfig {
        min_integration: 1,
        max_clients: 2,
        ..test_config("full")
    })
    .await;
    let addr = net.local_listen_addr().unwrap();

    let _first = RawPeer::connect(&addr).await;
    let _second = RawPeer::connect(&addr).await;
    assert!(wait_until(|| net.peer_count() == 2).await);

    let mut third = RawPeer::connect(&addr).await;
    assert!(third.closed().await);
    assert_eq!(net.peer_count(), 2);

    net.stop();
    tokio::time::timeout(WAIT, net.join()).await.unwrap();
}

#[tokio::test]
async fn test_shutdown_sentinel_ignored_by_default() {
    let node = started_node("guarded").await;
    let mut raw = RawPeer::connect(&node.local_listen_addr().unwrap()).await;
    raw.send_frame(&Frame::Shutdown).await;

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(node.is_running());
    assert_eq!(node.peer_count(), 1);

    shutdown(&node).await;
}

#[tokio::test]
async fn test_shutdown_sentinel_stops_node_when_allowed() {
    let node = murmur::GossipNode::new(
        NetworkerConfig {
            allow_remote_shutdown: true,
            ..test_config("open")
        },
        std::sync::Arc::new(murmur::MemoryInbox::new()),
        murmur::NodeSettings::default(),
    );
    node.start().await.unwrap();

    let mut raw = RawPeer::connect(&node.local_listen_addr().unwrap()).await;
    raw.send_frame(&Frame::Shutdown).await;

    tokio::time::timeout(WAIT, node.stopped()).await.unwrap();
    tokio::time::timeout(WAIT, node.join()).await.unwrap();
    assert!(!node.is_running());
    assert!(raw.closed().await);
}

#[tokio::test]
async fn test_connect_only_node_can_dial_out() {
    let server = started_networker(test_config("server")).await;
    let client = started_networker(NetworkerConfig {
        listen: false,
        ..test_config("client")
    })
    .await;

    let id = client
        .peer_add(server.local_listen_addr().unwrap())
        .await
        .unwrap();
    assert_eq!(id, 0);
    assert!(wait_until(|| server.peer_count() == 1).await);
    // Without a listener there is nothing to advertise
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(server.table().listen_addrs().is_empty());

    for net in [&client, &server] {
        net.stop();
        tokio::time::timeout(WAIT, net.join()).await.unwrap();
    }
}
