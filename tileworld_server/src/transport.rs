//! Session transport.
//!
//! Socket I/O runs on tokio tasks. The tick thread never touches a socket:
//! it drains [`TransportEvent`]s from a channel and issues sends through the
//! [`Transport`] trait, which for TCP turns into [`TransportCommand`]s for the
//! hub task that owns every connection's write side.
//!
//! Task layout:
//! - acceptor: accepts sockets, enforces `max_sessions`, hands them to the hub
//! - hub: owns the session table, routes commands, emits open/close events
//! - per session: one reader (frames -> events) and one writer (frames -> socket)

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU32, AtomicUsize, Ordering},
        Arc,
    },
};

use anyhow::Context;
use bytes::Bytes;
use tileworld_shared::net::{read_frame, write_frame, SessionId};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
    task::JoinHandle,
};
use tracing::{debug, info, trace, warn};

/// Socket-side happenings delivered to the tick thread.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Open(SessionId),
    Close(SessionId),
    /// One whole, unverified frame.
    Frame(SessionId, Bytes),
}

/// Requests from the tick thread to the socket side.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCommand {
    Send(SessionId, Bytes),
    /// With `include`, deliver to exactly `ids`; otherwise to every session
    /// not in `ids`.
    Broadcast {
        frame: Bytes,
        include: bool,
        ids: Vec<SessionId>,
    },
    Close(SessionId),
}

/// What the game server needs from a transport. Calls never block.
pub trait Transport {
    fn send(&mut self, to: SessionId, frame: Bytes);
    fn broadcast(&mut self, frame: Bytes, include: bool, ids: &[SessionId]);
    fn close(&mut self, id: SessionId);
}

enum HubMsg {
    Command(TransportCommand),
    Attach(SessionId, TcpStream),
    Detach(SessionId),
}

struct SessionHandle {
    frames: mpsc::UnboundedSender<Bytes>,
    reader: JoinHandle<()>,
}

/// TCP transport. Cloning shares the same hub.
#[derive(Clone)]
pub struct TcpTransport {
    hub: mpsc::UnboundedSender<HubMsg>,
    local_addr: SocketAddr,
}

impl TcpTransport {
    /// Binds `addr` and starts the acceptor and hub tasks.
    pub async fn bind(
        addr: &str,
        max_sessions: usize,
    ) -> anyhow::Result<(Self, mpsc::Receiver<TransportEvent>)> {
        let addr: SocketAddr = addr.parse().context("parse server_addr")?;
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;
        let local_addr = listener.local_addr().context("local addr")?;

        let (hub_tx, hub_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::channel(1024);
        let live = Arc::new(AtomicUsize::new(0));

        tokio::spawn(run_hub(hub_rx, hub_tx.clone(), events_tx, live.clone()));
        tokio::spawn(run_acceptor(listener, hub_tx.clone(), live, max_sessions));

        info!(%local_addr, max_sessions, "transport listening");
        Ok((
            Self {
                hub: hub_tx,
                local_addr,
            },
            events_rx,
        ))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn command(&self, cmd: TransportCommand) {
        if self.hub.send(HubMsg::Command(cmd)).is_err() {
            warn!("transport hub is gone; command dropped");
        }
    }
}

impl Transport for TcpTransport {
    fn send(&mut self, to: SessionId, frame: Bytes) {
        self.command(TransportCommand::Send(to, frame));
    }

    fn broadcast(&mut self, frame: Bytes, include: bool, ids: &[SessionId]) {
        self.command(TransportCommand::Broadcast {
            frame,
            include,
            ids: ids.to_vec(),
        });
    }

    fn close(&mut self, id: SessionId) {
        self.command(TransportCommand::Close(id));
    }
}

async fn run_acceptor(
    listener: TcpListener,
    hub: mpsc::UnboundedSender<HubMsg>,
    live: Arc<AtomicUsize>,
    max_sessions: usize,
) {
    let next_id = AtomicU32::new(0);
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };

        if live.load(Ordering::Acquire) >= max_sessions {
            warn!(%peer, max_sessions, "session limit reached; refusing connection");
            drop(stream);
            continue;
        }
        live.fetch_add(1, Ordering::AcqRel);

        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer, error = %e, "set_nodelay failed");
        }
        let id = SessionId(next_id.fetch_add(1, Ordering::Relaxed));
        debug!(session = %id, %peer, "accepted");
        if hub.send(HubMsg::Attach(id, stream)).is_err() {
            break;
        }
    }
}

async fn run_hub(
    mut rx: mpsc::UnboundedReceiver<HubMsg>,
    hub_tx: mpsc::UnboundedSender<HubMsg>,
    events: mpsc::Sender<TransportEvent>,
    live: Arc<AtomicUsize>,
) {
    let mut sessions: HashMap<SessionId, SessionHandle> = HashMap::new();

    while let Some(msg) = rx.recv().await {
        match msg {
            HubMsg::Attach(id, stream) => {
                // Open goes out before the reader can produce any frame.
                if events.send(TransportEvent::Open(id)).await.is_err() {
                    break;
                }
                let handle = spawn_session(id, stream, events.clone(), hub_tx.clone());
                sessions.insert(id, handle);
            }
            HubMsg::Detach(id) => {
                if let Some(handle) = sessions.remove(&id) {
                    drop(handle.frames);
                    live.fetch_sub(1, Ordering::AcqRel);
                    let _ = events.send(TransportEvent::Close(id)).await;
                }
            }
            HubMsg::Command(TransportCommand::Close(id)) => {
                if let Some(handle) = sessions.remove(&id) {
                    handle.reader.abort();
                    drop(handle.frames);
                    live.fetch_sub(1, Ordering::AcqRel);
                    info!(session = %id, "session closed by server");
                    let _ = events.send(TransportEvent::Close(id)).await;
                }
            }
            HubMsg::Command(TransportCommand::Send(id, frame)) => match sessions.get(&id) {
                Some(handle) => {
                    let _ = handle.frames.send(frame);
                }
                None => trace!(session = %id, "send to unknown session dropped"),
            },
            HubMsg::Command(TransportCommand::Broadcast {
                frame,
                include,
                ids,
            }) => {
                if include {
                    for id in &ids {
                        if let Some(handle) = sessions.get(id) {
                            let _ = handle.frames.send(frame.clone());
                        }
                    }
                } else {
                    for (id, handle) in &sessions {
                        if !ids.contains(id) {
                            let _ = handle.frames.send(frame.clone());
                        }
                    }
                }
            }
        }
    }
}

fn spawn_session(
    id: SessionId,
    stream: TcpStream,
    events: mpsc::Sender<TransportEvent>,
    hub: mpsc::UnboundedSender<HubMsg>,
) -> SessionHandle {
    let (mut read_half, mut write_half) = stream.into_split();
    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<Bytes>();

    tokio::spawn(async move {
        while let Some(frame) = frames_rx.recv().await {
            if let Err(e) = write_frame(&mut write_half, &frame).await {
                debug!(session = %id, error = %e, "write failed");
                break;
            }
        }
        // Dropping the write half shuts the socket down for writing.
    });

    let reader = tokio::spawn(async move {
        loop {
            match read_frame(&mut read_half).await {
                Ok(Some(frame)) => {
                    trace!(session = %id, len = frame.len(), "frame");
                    if events.send(TransportEvent::Frame(id, frame)).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(session = %id, error = %e, "read failed");
                    break;
                }
            }
        }
        let _ = hub.send(HubMsg::Detach(id));
    });

    SessionHandle {
        frames: frames_tx,
        reader,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tileworld_shared::net::build;
    use tokio::time::timeout;

    async fn next_event(rx: &mut mpsc::Receiver<TransportEvent>) -> TransportEvent {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("event in time")
            .expect("channel open")
    }

    #[tokio::test]
    async fn open_frame_close_sequence() {
        let (transport, mut events) = TcpTransport::bind("127.0.0.1:0", 4).await.unwrap();
        let addr = transport.local_addr();

        let mut client = TcpStream::connect(addr).await.unwrap();
        let id = match next_event(&mut events).await {
            TransportEvent::Open(id) => id,
            other => panic!("expected open, got {other:?}"),
        };

        let frame = build(4, &[0; 9]).unwrap();
        write_frame(&mut client, &frame).await.unwrap();
        assert_eq!(next_event(&mut events).await, TransportEvent::Frame(id, frame));

        drop(client);
        assert_eq!(next_event(&mut events).await, TransportEvent::Close(id));
    }

    #[tokio::test]
    async fn refuses_sessions_beyond_limit() {
        let (transport, mut events) = TcpTransport::bind("127.0.0.1:0", 1).await.unwrap();
        let addr = transport.local_addr();

        let _first = TcpStream::connect(addr).await.unwrap();
        assert!(matches!(next_event(&mut events).await, TransportEvent::Open(_)));

        let mut second = TcpStream::connect(addr).await.unwrap();
        // The refused socket is closed without an Open event.
        let eof = timeout(Duration::from_secs(2), read_frame(&mut second)).await.unwrap();
        assert!(matches!(eof, Ok(None) | Err(_)));
        assert!(timeout(Duration::from_millis(100), events.recv()).await.is_err());
    }

    #[tokio::test]
    async fn server_close_emits_close_event() {
        let (mut transport, mut events) = TcpTransport::bind("127.0.0.1:0", 4).await.unwrap();
        let mut client = TcpStream::connect(transport.local_addr()).await.unwrap();
        let TransportEvent::Open(id) = next_event(&mut events).await else {
            panic!("expected open");
        };

        let frame = build(2, &[1, 0, 0, 0]).unwrap();
        transport.send(id, frame.clone());
        let got = timeout(Duration::from_secs(2), read_frame(&mut client)).await.unwrap().unwrap();
        assert_eq!(got, Some(frame));

        transport.close(id);
        assert_eq!(next_event(&mut events).await, TransportEvent::Close(id));
    }
}
