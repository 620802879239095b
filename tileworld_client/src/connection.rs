//! Connection to the server.
//!
//! The socket lives on two tokio tasks; the game loop only sees a
//! [`ServerLink`], which queues outgoing frames and hands back whatever
//! arrived since the last poll. Nothing here blocks the tick.

use std::time::Duration;

use anyhow::{anyhow, Context};
use bytes::Bytes;
use tileworld_shared::net::{read_frame, write_frame};
use tokio::{net::TcpStream, sync::mpsc};
use tracing::{debug, info};

/// What arrived from the server.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// One whole, unverified frame.
    Frame(Bytes),
    /// The connection is gone; the string is shown to the user.
    Closed(String),
}

/// Client side of a session.
pub trait ServerLink {
    fn send(&mut self, frame: Bytes);
    /// Next pending event, if any.
    fn poll(&mut self) -> Option<LinkEvent>;
    fn is_open(&self) -> bool;
}

/// TCP link.
pub struct Connection {
    outgoing: mpsc::UnboundedSender<Bytes>,
    incoming: mpsc::UnboundedReceiver<LinkEvent>,
    open: bool,
    close_reported: bool,
}

impl Connection {
    /// Connects within `timeout`. Errors are phrased for the user.
    pub async fn connect(addr: &str, timeout: Duration) -> anyhow::Result<Self> {
        info!(server = %addr, "Connecting to server");
        let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(e).with_context(|| format!("could not connect to {addr}")),
            Err(_) => {
                return Err(anyhow!(
                    "connection to {addr} timed out after {} ms",
                    timeout.as_millis()
                ))
            }
        };
        stream.set_nodelay(true).context("set_nodelay")?;
        Ok(Self::spawn(stream))
    }

    fn spawn(stream: TcpStream) -> Self {
        let (mut read_half, mut write_half) = stream.into_split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Bytes>();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        let closed_tx = in_tx.clone();
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if let Err(e) = write_frame(&mut write_half, &frame).await {
                    debug!(error = %e, "write failed");
                    let _ = closed_tx.send(LinkEvent::Closed(format!("{e:#}")));
                    break;
                }
            }
        });

        tokio::spawn(async move {
            let reason = loop {
                match read_frame(&mut read_half).await {
                    Ok(Some(frame)) => {
                        if in_tx.send(LinkEvent::Frame(frame)).is_err() {
                            return;
                        }
                    }
                    Ok(None) => break "server closed the connection".to_string(),
                    Err(e) => break format!("{e:#}"),
                }
            };
            let _ = in_tx.send(LinkEvent::Closed(reason));
        });

        Self {
            outgoing: out_tx,
            incoming: in_rx,
            open: true,
            close_reported: false,
        }
    }
}

impl ServerLink for Connection {
    fn send(&mut self, frame: Bytes) {
        if self.open && self.outgoing.send(frame).is_err() {
            self.open = false;
        }
    }

    fn poll(&mut self) -> Option<LinkEvent> {
        loop {
            let event = self.incoming.try_recv().ok()?;
            if matches!(event, LinkEvent::Closed(_)) {
                // Reader and writer may both report; only the first counts.
                if self.close_reported {
                    continue;
                }
                self.close_reported = true;
                self.open = false;
            }
            return Some(event);
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tileworld_shared::net::build;
    use tokio::net::TcpListener;

    async fn poll_until(conn: &mut Connection) -> LinkEvent {
        for _ in 0..200 {
            if let Some(event) = conn.poll() {
                return event;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no link event");
    }

    #[tokio::test]
    async fn frames_flow_both_ways_and_close_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let mut conn = Connection::connect(&addr, Duration::from_secs(1)).await.unwrap();
        let (mut server_side, _) = listener.accept().await.unwrap();

        let up = build(4, &[0; 9]).unwrap();
        conn.send(up.clone());
        assert_eq!(read_frame(&mut server_side).await.unwrap(), Some(up));

        let down = build(2, &[5, 0, 0, 0]).unwrap();
        write_frame(&mut server_side, &down).await.unwrap();
        assert_eq!(poll_until(&mut conn).await, LinkEvent::Frame(down));

        drop(server_side);
        assert!(matches!(poll_until(&mut conn).await, LinkEvent::Closed(_)));
        assert!(!conn.is_open());
    }

    #[tokio::test]
    async fn refused_connection_is_an_error() {
        // Bind then drop to get a port nobody listens on.
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().to_string()
        };
        let err = Connection::connect(&addr, Duration::from_secs(1)).await.err().unwrap();
        assert!(format!("{err:#}").contains("could not connect"));
    }
}
