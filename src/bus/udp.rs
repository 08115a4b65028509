//! UDP broadcast bus.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{BusError, FrameTx, RawFrame};
use crate::protocol::FRAME_SIZE;

/// UDP bus configuration.
#[derive(Clone, Debug)]
pub struct UdpBusConfig {
    /// Port the mesh broadcasts on.
    pub port: u16,
    /// Address the socket binds to.
    pub bind_addr: String,
    /// Destination address for broadcasts. The limited-broadcast
    /// address by default; a subnet broadcast or unicast address can be
    /// substituted for constrained networks and tests.
    pub broadcast_addr: String,
}

impl Default for UdpBusConfig {
    fn default() -> Self {
        Self {
            port: super::DEFAULT_PORT,
            bind_addr: "0.0.0.0".into(),
            broadcast_addr: "255.255.255.255".into(),
        }
    }
}

/// Broadcast bus over a single UDP socket.
///
/// One socket serves the whole mesh; inbound datagrams whose length is
/// exactly the framed message size are forwarded into the node's frame
/// channel, everything else is dropped here.
pub struct UdpBus {
    config: UdpBusConfig,
    socket: Option<Arc<UdpSocket>>,
    frame_tx: FrameTx,
    recv_task: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl UdpBus {
    pub fn new(config: UdpBusConfig, frame_tx: FrameTx) -> Self {
        Self {
            config,
            socket: None,
            frame_tx,
            recv_task: None,
            local_addr: None,
        }
    }

    /// Local bound address (only valid after start).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Bind the socket, enable broadcast, spawn the receive loop.
    pub async fn start(&mut self) -> Result<(), BusError> {
        if self.socket.is_some() {
            return Err(BusError::AlreadyStarted);
        }

        let bind = format!("{}:{}", self.config.bind_addr, self.config.port);
        let socket = UdpSocket::bind(&bind)
            .await
            .map_err(|e| BusError::StartFailed(format!("bind {}: {}", bind, e)))?;
        socket
            .set_broadcast(true)
            .map_err(|e| BusError::StartFailed(format!("set_broadcast: {}", e)))?;

        self.local_addr = Some(
            socket
                .local_addr()
                .map_err(|e| BusError::StartFailed(format!("local_addr: {}", e)))?,
        );

        let socket = Arc::new(socket);
        self.socket = Some(socket.clone());

        let frame_tx = self.frame_tx.clone();
        self.recv_task = Some(tokio::spawn(async move {
            udp_receive_loop(socket, frame_tx).await;
        }));

        info!(local_addr = %self.local_addr.unwrap(), "UDP bus started");
        Ok(())
    }

    /// Abort the receive loop and drop the socket.
    pub async fn stop(&mut self) {
        if let Some(task) = self.recv_task.take() {
            task.abort();
            let _ = task.await;
        }
        self.socket.take();
        self.local_addr = None;
        debug!("UDP bus stopped");
    }

    pub async fn broadcast(&self, frame: &[u8]) -> Result<(), BusError> {
        if frame.len() > FRAME_SIZE {
            return Err(BusError::FrameTooLarge {
                max: FRAME_SIZE,
                got: frame.len(),
            });
        }
        let socket = self.socket.as_ref().ok_or(BusError::NotStarted)?;
        let dest = format!("{}:{}", self.config.broadcast_addr, self.config.port);
        socket
            .send_to(frame, &dest)
            .await
            .map_err(|e| BusError::SendFailed(e.to_string()))?;
        Ok(())
    }
}

/// Receive loop: forwards exact-size datagrams, drops the rest.
async fn udp_receive_loop(socket: Arc<UdpSocket>, frame_tx: FrameTx) {
    let mut buf = vec![0u8; FRAME_SIZE + 64];

    debug!("UDP receive loop starting");
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, remote_addr)) => {
                if len != FRAME_SIZE {
                    debug!(bytes = len, remote_addr = %remote_addr, "dropping odd-size datagram");
                    continue;
                }
                let frame = RawFrame {
                    data: buf[..len].to_vec(),
                };
                if frame_tx.send(frame).await.is_err() {
                    info!("frame channel closed, stopping receive loop");
                    break;
                }
            }
            Err(e) => {
                // Transient errors are expected on a lossy medium.
                warn!(error = %e, "UDP receive error");
            }
        }
    }
    debug!("UDP receive loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::frame_channel;
    use tokio::time::{timeout, Duration};

    fn loopback_config(port: u16) -> UdpBusConfig {
        UdpBusConfig {
            port,
            bind_addr: "127.0.0.1".into(),
            broadcast_addr: "127.0.0.1".into(),
        }
    }

    #[tokio::test]
    async fn test_start_stop() {
        let (tx, _rx) = frame_channel(16);
        let mut bus = UdpBus::new(loopback_config(0), tx);

        bus.start().await.unwrap();
        assert!(bus.local_addr().is_some());

        let result = bus.start().await;
        assert!(matches!(result, Err(BusError::AlreadyStarted)));

        bus.stop().await;
        assert!(bus.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_broadcast_not_started() {
        let (tx, _rx) = frame_channel(16);
        let bus = UdpBus::new(loopback_config(0), tx);
        let result = bus.broadcast(&[0u8; FRAME_SIZE]).await;
        assert!(matches!(result, Err(BusError::NotStarted)));
    }

    #[tokio::test]
    async fn test_length_filter() {
        // Bind on an ephemeral port, loop a frame back to ourselves.
        let (tx, mut rx) = frame_channel(16);
        let mut bus = UdpBus::new(loopback_config(0), tx);
        bus.start().await.unwrap();
        let port = bus.local_addr().unwrap().port();
        bus.config.broadcast_addr = "127.0.0.1".into();
        bus.config.port = port;

        // Wrong size: dropped by the bus.
        bus.socket
            .as_ref()
            .unwrap()
            .send_to(&[1u8; 10], ("127.0.0.1", port))
            .await
            .unwrap();

        // Exact size: delivered.
        let frame = [7u8; FRAME_SIZE];
        bus.broadcast(&frame).await.unwrap();

        let received = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timeout")
            .expect("channel closed");
        assert_eq!(received.data, frame);
        assert!(rx.try_recv().is_err());

        bus.stop().await;
    }

    #[tokio::test]
    async fn test_oversize_frame_rejected() {
        let (tx, _rx) = frame_channel(16);
        let mut bus = UdpBus::new(loopback_config(0), tx);
        bus.start().await.unwrap();

        let result = bus.broadcast(&[0u8; FRAME_SIZE + 1]).await;
        assert!(matches!(result, Err(BusError::FrameTooLarge { .. })));

        bus.stop().await;
    }
}
