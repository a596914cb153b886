//! Server network layer: TCP accept loop and the single session event loop

use crate::session::{Outbound, Session, SessionState};
use log::{debug, error, info, warn};
use shared::transport::{read_messages, spawn_writer};
use shared::{Message, SessionContext, TickInput};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

/// Transport-level handle for one accepted stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Messages sent from network tasks to the session loop
#[derive(Debug)]
pub enum ServerEvent<I> {
    Connected {
        conn: ConnectionId,
        addr: SocketAddr,
        frames: mpsc::UnboundedSender<Vec<u8>>,
        reader: JoinHandle<()>,
    },
    MessageReceived {
        conn: ConnectionId,
        message: Message<I>,
    },
    Disconnected {
        conn: ConnectionId,
    },
}

struct Connection {
    addr: SocketAddr,
    frames: mpsc::UnboundedSender<Vec<u8>>,
    reader: JoinHandle<()>,
}

impl Drop for Connection {
    /// Stops reading; with the writer gone too the socket is fully closed.
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Lockstep relay server. Owns the session; socket tasks only move bytes.
pub struct Server<I> {
    ctx: SessionContext,
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    session: Session<ConnectionId, I>,
    connections: HashMap<ConnectionId, Connection>,
    lobby_deadline: Option<Instant>,
    acceptor: Option<JoinHandle<()>>,

    event_tx: mpsc::UnboundedSender<ServerEvent<I>>,
    event_rx: mpsc::UnboundedReceiver<ServerEvent<I>>,
}

impl<I: TickInput> Server<I> {
    pub async fn bind(ctx: SessionContext, addr: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("{} listening on {}", ctx.label(), local_addr);

        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Ok(Server {
            session: Session::new(&ctx),
            connections: HashMap::with_capacity(ctx.config.max_connections as usize),
            ctx,
            listener: Some(listener),
            local_addr,
            lobby_deadline: None,
            acceptor: None,
            event_tx,
            event_rx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn session(&self) -> &Session<ConnectionId, I> {
        &self.session
    }

    /// Spawns the task that accepts streams and their reader/writer tasks
    fn spawn_acceptor(&mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        let event_tx = self.event_tx.clone();
        let impairment = self.ctx.config.impairment;
        let label = self.ctx.label().to_string();

        self.acceptor = Some(tokio::spawn(async move {
            let mut next_id = 1u64;

            loop {
                let (stream, addr) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("{} accept failed: {}", label, e);
                        continue;
                    }
                };
                if let Err(e) = stream.set_nodelay(true) {
                    warn!("{} could not disable Nagle for {}: {}", label, addr, e);
                }

                let conn = ConnectionId(next_id);
                next_id += 1;

                let (reader, writer) = stream.into_split();
                let (frames_tx, frames_rx) = mpsc::unbounded_channel();
                spawn_writer(writer, frames_rx, impairment, format!("{} {}", label, conn));

                // The reader starts only once `Connected` is queued, so the
                // loop never sees a message from an unknown connection
                let (ready_tx, ready_rx) = oneshot::channel::<()>();
                let reader_tx = event_tx.clone();
                let reader_label = format!("{} {}", label, conn);
                let reader_task = tokio::spawn(async move {
                    if ready_rx.await.is_err() {
                        return;
                    }
                    let result = read_messages(reader, &reader_label, |message| {
                        reader_tx
                            .send(ServerEvent::MessageReceived { conn, message })
                            .is_ok()
                    })
                    .await;
                    if let Err(e) = result {
                        debug!("{} read ended: {}", reader_label, e);
                    }
                    let _ = reader_tx.send(ServerEvent::Disconnected { conn });
                });

                if event_tx
                    .send(ServerEvent::Connected {
                        conn,
                        addr,
                        frames: frames_tx,
                        reader: reader_task,
                    })
                    .is_err()
                {
                    break;
                }
                let _ = ready_tx.send(());
            }
        }));
    }

    fn handle_event(&mut self, event: ServerEvent<I>) {
        match event {
            ServerEvent::Connected {
                conn,
                addr,
                frames,
                reader,
            } => {
                info!("{} connection {} from {}", self.ctx.label(), conn, addr);
                self.connections.insert(
                    conn,
                    Connection {
                        addr,
                        frames,
                        reader,
                    },
                );

                match self.session.accept(conn) {
                    Ok(outbound) => {
                        if self.lobby_deadline.is_none() {
                            self.lobby_deadline =
                                self.ctx.config.lobby_timeout.map(|t| Instant::now() + t);
                        }
                        self.dispatch(outbound);
                    }
                    Err(e) => {
                        warn!("{} refusing {}: {}", self.ctx.label(), addr, e);
                        self.dispatch(vec![Outbound::Close { to: conn }]);
                    }
                }
            }
            ServerEvent::MessageReceived { conn, message } => {
                if !self.connections.contains_key(&conn) {
                    return;
                }
                let outbound = self.session.handle_message(conn, message);
                self.dispatch(outbound);
            }
            ServerEvent::Disconnected { conn } => {
                if let Some(connection) = self.connections.remove(&conn) {
                    info!(
                        "{} connection {} ({}) closed",
                        self.ctx.label(),
                        conn,
                        connection.addr
                    );
                }
                let outbound = self.session.handle_disconnect(conn);
                self.dispatch(outbound);
            }
        }
    }

    /// Encodes and queues every outbound action on its connection's writer
    fn dispatch(&mut self, outbound: Vec<Outbound<ConnectionId, I>>) {
        for action in outbound {
            match action {
                Outbound::Send { to, message } => {
                    let Some(connection) = self.connections.get(&to) else {
                        continue;
                    };
                    match message.encode() {
                        Ok(frame) => {
                            if connection.frames.send(frame).is_err() {
                                debug!("{} writer for {} already gone", self.ctx.label(), to);
                            }
                        }
                        Err(e) => error!(
                            "{} failed to encode {} for {}: {}",
                            self.ctx.label(),
                            message.name(),
                            to,
                            e
                        ),
                    }
                }
                Outbound::Close { to } => {
                    // Queued frames are still flushed by the writer before
                    // it shuts down; the reader is aborted on drop
                    if self.connections.remove(&to).is_some() {
                        debug!("{} closed connection {}", self.ctx.label(), to);
                    }
                }
            }
        }
    }

    /// Main server loop. Returns once a started session has no live peers.
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_acceptor();
        info!(
            "{} waiting for {} peers",
            self.ctx.label(),
            self.ctx.config.max_connections
        );

        loop {
            let lobby_open = self.session.state() == SessionState::Lobby;
            let deadline = self.lobby_deadline;

            tokio::select! {
                event = self.event_rx.recv() => {
                    match event {
                        Some(event) => self.handle_event(event),
                        None => break,
                    }
                },

                _ = wait_until(deadline), if lobby_open && deadline.is_some() => {
                    info!("{} lobby timeout elapsed", self.ctx.label());
                    self.lobby_deadline = None;
                    let outbound = self.session.start();
                    self.dispatch(outbound);
                },
            }

            if self.session.is_finished() {
                info!(
                    "{} session over ({:?}), shutting down",
                    self.ctx.label(),
                    self.session.state()
                );
                break;
            }
        }

        if let Some(acceptor) = self.acceptor.take() {
            acceptor.abort();
        }
        self.connections.clear();
        Ok(())
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
