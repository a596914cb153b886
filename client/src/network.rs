use crate::session::ClientSession;
use log::{debug, info, warn};
use shared::transport::{read_messages, spawn_writer};
use shared::{InputSource, Message, SessionContext, Simulation, Tick};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval, Instant, MissedTickBehavior};

/// Messages sent from the socket reader task to the frame loop
#[derive(Debug)]
pub enum ClientEvent<I> {
    MessageReceived(Message<I>),
    Disconnected,
}

pub struct Client<S: Simulation, Src> {
    session: ClientSession<S, Src>,
    frame_rate: u32,
    frames: Option<mpsc::UnboundedSender<Vec<u8>>>,
    events: mpsc::UnboundedReceiver<ClientEvent<S::Input>>,
}

impl<S, Src> Client<S, Src>
where
    S: Simulation,
    Src: InputSource<S::Input>,
{
    pub async fn connect(
        ctx: &SessionContext,
        server_addr: &str,
        session: ClientSession<S, Src>,
        frame_rate: u32,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let stream = TcpStream::connect(server_addr).await?;
        stream.set_nodelay(true)?;
        info!("{} connected to {}", ctx.label(), server_addr);

        let (reader, writer) = stream.into_split();
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        spawn_writer(
            writer,
            frames_rx,
            ctx.config.impairment,
            ctx.label().to_string(),
        );

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let label = ctx.label().to_string();
        tokio::spawn(async move {
            let result = read_messages(reader, &label, |message| {
                event_tx.send(ClientEvent::MessageReceived(message)).is_ok()
            })
            .await;
            if let Err(e) = result {
                debug!("{} read ended: {}", label, e);
            }
            let _ = event_tx.send(ClientEvent::Disconnected);
        });

        Ok(Client {
            session,
            frame_rate: frame_rate.max(1),
            frames: Some(frames_tx),
            events: event_rx,
        })
    }

    pub fn session(&self) -> &ClientSession<S, Src> {
        &self.session
    }

    /// Frame loop. Polls the inbound channel without blocking, advances the
    /// clock by the measured frame time and queues the resulting frames.
    ///
    /// Returns once `stop_after` ticks are confirmed or the server closes the
    /// stream, and fails with the desync error if the session desyncs.
    pub async fn run(&mut self, stop_after: Option<Tick>) -> Result<(), Box<dyn std::error::Error>> {
        let mut frame_interval = interval(Duration::from_secs_f64(1.0 / self.frame_rate as f64));
        frame_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_frame = Instant::now();
        let mut server_closed = false;

        loop {
            frame_interval.tick().await;
            let now = Instant::now();
            let dt = now.duration_since(last_frame).as_secs_f64();
            last_frame = now;

            while let Ok(event) = self.events.try_recv() {
                match event {
                    ClientEvent::MessageReceived(message) => {
                        if let Err(e) = self.session.handle_message(message) {
                            warn!("{} {}", self.session.label(), e);
                        }
                    }
                    ClientEvent::Disconnected => server_closed = true,
                }
            }

            let (_, frames) = self.session.advance(dt)?;
            if let Some(sender) = &self.frames {
                for frame in frames {
                    if sender.send(frame).is_err() {
                        server_closed = true;
                        break;
                    }
                }
            }

            if let Some(err) = self.session.desync_error() {
                return Err(Box::new(err));
            }

            let confirmed = self
                .session
                .clock()
                .map_or(0, |clock| clock.clock().current_confirmed_tick);
            if stop_after.is_some_and(|target| confirmed >= target) {
                info!(
                    "{} reached tick {}, disconnecting",
                    self.session.label(),
                    confirmed
                );
                break;
            }

            if server_closed {
                info!("{} server closed the connection", self.session.label());
                break;
            }
        }

        // Dropping the sender flushes queued frames and closes the stream
        self.frames = None;
        Ok(())
    }
}
