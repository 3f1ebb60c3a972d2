//! BLE connection transport.
//!
//! In production this would speak `ankibluetoothd`'s IPC protocol over a
//! unix socket per connection. The only implementation here is a loopback
//! TCP stand-in used for local development — each length-prefixed frame on
//! the socket stands in for one raw BLE characteristic write, since TCP has
//! no message boundaries of its own and every fragment the core emits is
//! already at most [`MTU`] bytes.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use victor_core::fragment::MTU;

/// One accepted BLE connection, reduced to raw MTU-sized buffers in each
/// direction. The session executor owns this for the connection's lifetime.
pub struct Connection {
    pub peer: String,
    pub inbound: mpsc::UnboundedReceiver<Vec<u8>>,
    pub outbound: mpsc::UnboundedSender<Vec<u8>>,
}

/// Accepts new BLE connections. Generic rather than a trait object — the
/// daemon only ever drives one concrete transport at a time.
pub trait Transport: Send {
    fn accept(&mut self) -> impl std::future::Future<Output = std::io::Result<Connection>> + Send;
}

/// Loopback TCP stand-in for `ankibluetoothd`'s per-connection socket.
pub struct TcpTransport {
    listener: TcpListener,
}

impl TcpTransport {
    pub async fn bind(addr: &str) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }
}

impl Transport for TcpTransport {
    async fn accept(&mut self) -> std::io::Result<Connection> {
        let (stream, addr) = self.listener.accept().await?;
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_socket(stream, inbound_tx, outbound_rx));
        Ok(Connection {
            peer: addr.to_string(),
            inbound: inbound_rx,
            outbound: outbound_tx,
        })
    }
}

/// Shuttles length-prefixed frames between the socket and the connection's
/// channels until either side closes.
async fn run_socket(
    stream: TcpStream,
    inbound_tx: mpsc::UnboundedSender<Vec<u8>>,
    mut outbound_rx: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    let (mut read_half, mut write_half) = stream.into_split();

    let reader = async move {
        let mut len_buf = [0u8; 1];
        loop {
            if read_half.read_exact(&mut len_buf).await.is_err() {
                return;
            }
            let mut buf = vec![0u8; len_buf[0] as usize];
            if read_half.read_exact(&mut buf).await.is_err() {
                return;
            }
            if inbound_tx.send(buf).is_err() {
                return;
            }
        }
    };

    let writer = async move {
        while let Some(buf) = outbound_rx.recv().await {
            debug_assert!(buf.len() <= MTU, "fragment exceeds MTU");
            let len = [buf.len() as u8];
            if write_half.write_all(&len).await.is_err() {
                return;
            }
            if write_half.write_all(&buf).await.is_err() {
                return;
            }
        }
    };

    tokio::join!(reader, writer);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tcp_transport_round_trips_a_buffer() {
        let mut transport = TcpTransport::bind("127.0.0.1:0").await.unwrap();
        let addr = transport.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(&[3u8, 0xaa, 0xbb, 0xcc]).await.unwrap();
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await.unwrap();
            let mut reply = vec![0u8; len[0] as usize];
            stream.read_exact(&mut reply).await.unwrap();
            reply
        });

        let mut conn = transport.accept().await.unwrap();
        let received = conn.inbound.recv().await.unwrap();
        assert_eq!(received, vec![0xaa, 0xbb, 0xcc]);
        conn.outbound.send(vec![0x01, 0x02]).unwrap();

        let reply = client.await.unwrap();
        assert_eq!(reply, vec![0x01, 0x02]);
    }
}
