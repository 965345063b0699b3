//! Loopback helpers shared by the integration tests.

#![allow(dead_code)]

use bytes::BytesMut;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use murmur::network::wire::parse_frames;
use murmur::{Frame, GossipNode, MemoryInbox, Networker, NetworkerConfig, NodeSettings, PeerAddr};

pub const WAIT: Duration = Duration::from_secs(5);

pub fn test_config(name: &str) -> NetworkerConfig {
    NetworkerConfig {
        name: name.to_string(),
        bind_host: "127.0.0.1".to_string(),
        port: 0,
        tick_interval: Duration::from_millis(20),
        connect_timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

pub async fn started_networker(config: NetworkerConfig) -> Arc<Networker> {
    let net = Networker::new(config);
    net.start().await.unwrap();
    net
}

pub async fn started_node(name: &str) -> Arc<GossipNode> {
    let node = GossipNode::new(
        test_config(name),
        Arc::new(MemoryInbox::new()),
        NodeSettings::default(),
    );
    node.start().await.unwrap();
    node
}

pub async fn shutdown(node: &GossipNode) {
    node.stop();
    tokio::time::timeout(WAIT, node.join()).await.unwrap();
}

/// Poll `check` until it holds or `WAIT` runs out.
pub async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

/// A bare socket speaking the wire protocol by hand
pub struct RawPeer {
    pub stream: TcpStream,
    buf: BytesMut,
    pending: VecDeque<Frame>,
}

impl RawPeer {
    pub async fn connect(addr: &PeerAddr) -> Self {
        let stream = TcpStream::connect((addr.host.as_str(), addr.port))
            .await
            .unwrap();
        Self {
            stream,
            buf: BytesMut::new(),
            pending: VecDeque::new(),
        }
    }

    pub async fn send(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
        self.stream.flush().await.unwrap();
    }

    pub async fn send_frame(&mut self, frame: &Frame) {
        let data = frame.encode().unwrap();
        self.send(&data).await;
    }

    /// Read frames until one matches, skipping the rest (HELLO, REQUESTPEER
    /// from the integration controller, ...). None on EOF or timeout.
    pub async fn expect(&mut self, wanted: impl FnMut(&Frame) -> bool) -> Option<Frame> {
        self.expect_within(WAIT, wanted).await
    }

    pub async fn expect_within(
        &mut self,
        limit: Duration,
        mut wanted: impl FnMut(&Frame) -> bool,
    ) -> Option<Frame> {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            while let Some(frame) = self.pending.pop_front() {
                if wanted(&frame) {
                    return Some(frame);
                }
            }
            let mut chunk = [0u8; 1024];
            let read = tokio::time::timeout_at(deadline, self.stream.read(&mut chunk)).await;
            match read {
                Ok(Ok(0)) | Ok(Err(_)) | Err(_) => return None,
                Ok(Ok(n)) => {
                    self.buf.extend_from_slice(&chunk[..n]);
                    self.pending.extend(parse_frames(&mut self.buf).frames);
                }
            }
        }
    }

    /// True once the remote side closed the link
    pub async fn closed(&mut self) -> bool {
        self.expect(|_| false).await;
        let mut chunk = [0u8; 16];
        matches!(
            tokio::time::timeout(Duration::from_millis(100), self.stream.read(&mut chunk)).await,
            Ok(Ok(0)) | Ok(Err(_))
        )
    }
}
