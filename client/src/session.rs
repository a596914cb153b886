//! Client session: glue between decoded server messages and the tick clock

use crate::clock::{ClockState, FrameReport, TickClock};
use crate::dispatch::ClientDispatch;
use crate::error::ClientError;
use crate::input::InputChannel;
use log::{info, warn};
use shared::{
    DesyncError, InputSource, Message, NetworkId, SessionContext, Simulation, StartSession,
};

/// Builds the simulation once the roster is known.
pub type SimFactory<S> = Box<dyn FnOnce(&StartSession) -> S + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientPhase {
    AwaitingStart,
    Playing,
}

struct Playing<S: Simulation, Src> {
    network_id: NetworkId,
    roster: Vec<NetworkId>,
    sim: S,
    clock: TickClock,
    dispatch: ClientDispatch<S::Input>,
    channel: InputChannel<S::Input, Src>,
}

pub struct ClientSession<S: Simulation, Src> {
    ctx: SessionContext,
    factory: Option<SimFactory<S>>,
    source: Option<Src>,
    playing: Option<Playing<S, Src>>,
}

impl<S, Src> ClientSession<S, Src>
where
    S: Simulation,
    Src: InputSource<S::Input>,
{
    pub fn new(ctx: &SessionContext, factory: SimFactory<S>, source: Src) -> Self {
        Self {
            ctx: ctx.clone(),
            factory: Some(factory),
            source: Some(source),
            playing: None,
        }
    }

    pub fn handle_message(&mut self, message: Message<S::Input>) -> Result<(), ClientError> {
        match message {
            Message::StartSession(start) => self.start(start),
            Message::ConfirmedTickBroadcast(payload) => {
                let playing = self.playing.as_mut().ok_or(ClientError::NotStarted)?;
                playing.dispatch.push(payload);
                Ok(())
            }
            Message::DesyncNotice => {
                if let Some(playing) = self.playing.as_mut() {
                    playing.clock.mark_desynced(DesyncError::notice());
                }
                Ok(())
            }
            Message::ClientTickSubmit(submit) => {
                warn!(
                    "{} discarding ClientTickSubmit for tick {} from server",
                    self.ctx.label(),
                    submit.tick
                );
                Ok(())
            }
        }
    }

    fn start(&mut self, start: StartSession) -> Result<(), ClientError> {
        if self.playing.is_some() {
            warn!("{} ignoring repeated StartSession", self.ctx.label());
            return Ok(());
        }

        // Validate before consuming the factory so a bad start can be retried
        let label = format!("[client {}]", start.this_peer_id);
        let config = start.tick_rate_config(self.ctx.config.max_ticks_per_frame);
        let clock = TickClock::new(&label, config)?;

        let (Some(factory), Some(source)) = (self.factory.take(), self.source.take()) else {
            return Err(ClientError::NotStarted);
        };
        self.ctx = self.ctx.relabel(label);
        let channel = InputChannel::new(self.ctx.label(), start.this_peer_id, source);
        let sim = factory(&start);

        info!(
            "{} session started: roster {:?}, {} Hz, forced latency {}",
            self.ctx.label(),
            start.roster,
            start.tick_rate,
            start.forced_latency_ticks
        );

        self.playing = Some(Playing {
            network_id: start.this_peer_id,
            roster: start.roster,
            sim,
            clock,
            dispatch: ClientDispatch::new(),
            channel,
        });
        Ok(())
    }

    /// Runs the clock for one host frame and returns the frames to send.
    pub fn advance(&mut self, dt: f64) -> Result<(FrameReport, Vec<Vec<u8>>), ClientError> {
        let Some(playing) = self.playing.as_mut() else {
            return Ok((FrameReport::default(), Vec::new()));
        };

        let report = playing.clock.advance(
            dt,
            &mut playing.dispatch,
            &mut playing.sim,
            &mut playing.channel,
        )?;
        Ok((report, playing.channel.drain()))
    }

    pub fn phase(&self) -> ClientPhase {
        if self.playing.is_some() {
            ClientPhase::Playing
        } else {
            ClientPhase::AwaitingStart
        }
    }

    pub fn clock_state(&self) -> Option<ClockState> {
        self.playing.as_ref().map(|p| p.clock.state())
    }

    pub fn clock(&self) -> Option<&TickClock> {
        self.playing.as_ref().map(|p| &p.clock)
    }

    pub fn is_desynced(&self) -> bool {
        self.clock_state() == Some(ClockState::Desynced)
    }

    /// The desync as a terminal error, once the clock has entered `Desynced`.
    pub fn desync_error(&self) -> Option<DesyncError> {
        self.clock()?.desync_error().cloned()
    }

    pub fn network_id(&self) -> Option<NetworkId> {
        self.playing.as_ref().map(|p| p.network_id)
    }

    pub fn roster(&self) -> &[NetworkId] {
        match &self.playing {
            Some(playing) => &playing.roster,
            None => &[],
        }
    }

    pub fn simulation(&self) -> Option<&S> {
        self.playing.as_ref().map(|p| &p.sim)
    }

    pub fn queued_ticks(&self) -> usize {
        self.playing.as_ref().map_or(0, |p| p.dispatch.len())
    }

    pub fn label(&self) -> &str {
        self.ctx.label()
    }
}
