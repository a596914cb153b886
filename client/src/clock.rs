//! Fixed-step tick clock and rate controller
//!
//! The host calls [`TickClock::advance`] once per frame with the elapsed time.
//! The clock converts that time into whole ticks and, for each one, either
//! sends a priming input or applies the next confirmed tick and sends the
//! input `forced_latency_ticks` ahead of it.
//!
//! ## States
//!
//! - **Priming**: the first `forced_latency_ticks` inputs are sent one per
//!   tick interval without waiting for any confirmation.
//! - **Running**: a tick only advances when the server has confirmed it.
//!   Missing confirmations stall the clock without error; the accumulated
//!   time is kept so several ticks catch up in one frame once they arrive,
//!   bounded by `max_ticks_per_frame`.
//! - **Desynced**: terminal. Nothing is applied or sent any more.
//!
//! At all times `current_client_tick_to_send <= current_confirmed_tick +
//! forced_latency_ticks`.

use crate::dispatch::ClientDispatch;
use crate::error::ClientError;
use crate::input::InputChannel;
use log::{error, info, warn};
use shared::{ConfigError, DesyncError, InputSource, Simulation, Tick, TickRateConfig};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockState {
    Priming,
    Running,
    Desynced,
}

/// Timer and tick counters owned by the clock.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimulationClock {
    /// Seconds until the next tick is due; negative means ticks are owed
    pub time_left_to_next_tick: f64,
    /// Last tick whose input has been sent, 0 before the first send
    pub current_client_tick_to_send: Tick,
    /// Last tick applied to the simulation
    pub current_confirmed_tick: Tick,
    pub ticks_applied_this_frame: u32,
}

/// What one call to [`TickClock::advance`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameReport {
    pub ticks_sent: u32,
    pub ticks_applied: u32,
    pub last_applied: Option<Tick>,
    /// A confirmation was due but had not arrived yet
    pub stalled: bool,
}

pub struct TickClock {
    label: String,
    config: TickRateConfig,
    clock: SimulationClock,
    state: ClockState,
    desync: Option<DesyncError>,
}

impl TickClock {
    pub fn new(label: impl Into<String>, config: TickRateConfig) -> Result<Self, ConfigError> {
        if config.tick_rate == 0 {
            return Err(ConfigError::ZeroTickRate);
        }
        if config.forced_latency_ticks == 0 {
            return Err(ConfigError::ZeroForcedLatency);
        }
        if config.max_ticks_per_frame == 0 {
            return Err(ConfigError::ZeroMaxTicksPerFrame);
        }

        // The first tick is due one interval after the clock starts
        let clock = SimulationClock {
            time_left_to_next_tick: config.tick_interval(),
            ..SimulationClock::default()
        };

        Ok(Self {
            label: label.into(),
            config,
            clock,
            state: ClockState::Priming,
            desync: None,
        })
    }

    /// Runs every tick that is due after `dt` seconds.
    pub fn advance<S, Src>(
        &mut self,
        dt: f64,
        dispatch: &mut ClientDispatch<S::Input>,
        sim: &mut S,
        channel: &mut InputChannel<S::Input, Src>,
    ) -> Result<FrameReport, ClientError>
    where
        S: Simulation,
        Src: InputSource<S::Input>,
    {
        let mut report = FrameReport::default();
        if self.state == ClockState::Desynced {
            return Ok(report);
        }

        let interval = self.config.tick_interval();
        self.clock.ticks_applied_this_frame = 0;
        self.clock.time_left_to_next_tick -= dt;

        while self.clock.time_left_to_next_tick <= 0.0
            && self.clock.ticks_applied_this_frame < self.config.max_ticks_per_frame
        {
            match self.state {
                ClockState::Priming => {
                    let tick = self.clock.current_client_tick_to_send + 1;
                    channel.emit(tick, sim.state_hash())?;
                    self.clock.current_client_tick_to_send = tick;
                    report.ticks_sent += 1;

                    if tick >= self.config.forced_latency_ticks {
                        self.state = ClockState::Running;
                        info!(
                            "{} primed {} ticks, waiting for confirmations",
                            self.label, tick
                        );
                    }
                }
                ClockState::Running => {
                    let expected = self.clock.current_confirmed_tick + 1;
                    match dispatch.peek_next_tick() {
                        None => {
                            report.stalled = true;
                            break;
                        }
                        Some(tick) if tick < expected => {
                            dispatch.pop();
                            warn!("{} discarding stale tick {}", self.label, tick);
                            continue;
                        }
                        Some(tick) if tick > expected => {
                            return Err(ClientError::TickGap {
                                expected,
                                found: tick,
                            });
                        }
                        Some(_) => {}
                    }

                    let Some(payload) = dispatch.pop() else {
                        break;
                    };
                    if payload.desynced {
                        self.mark_desynced(DesyncError {
                            tick: Some(payload.tick),
                            hashes: BTreeMap::new(),
                        });
                        break;
                    }

                    sim.apply_tick(payload.tick, &payload.entries());
                    self.clock.current_confirmed_tick = payload.tick;
                    report.ticks_applied += 1;
                    report.last_applied = Some(payload.tick);

                    let send_tick = payload.tick + self.config.forced_latency_ticks;
                    channel.emit(send_tick, sim.state_hash())?;
                    self.clock.current_client_tick_to_send = send_tick;
                    report.ticks_sent += 1;
                }
                ClockState::Desynced => break,
            }

            self.clock.ticks_applied_this_frame += 1;
            self.clock.time_left_to_next_tick += interval;
        }

        debug_assert!(
            self.clock.current_client_tick_to_send
                <= self.clock.current_confirmed_tick + self.config.forced_latency_ticks
        );
        Ok(report)
    }

    /// Enters the terminal `Desynced` state. Later calls keep the first error.
    pub fn mark_desynced(&mut self, err: DesyncError) {
        if self.state == ClockState::Desynced {
            return;
        }
        error!("{} {}", self.label, err);
        self.state = ClockState::Desynced;
        self.desync = Some(err);
    }

    pub fn state(&self) -> ClockState {
        self.state
    }

    pub fn is_desynced(&self) -> bool {
        self.state == ClockState::Desynced
    }

    pub fn desync_error(&self) -> Option<&DesyncError> {
        self.desync.as_ref()
    }

    pub fn clock(&self) -> &SimulationClock {
        &self.clock
    }

    pub fn config(&self) -> &TickRateConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use shared::{ConfirmedTickPayload, FrameDecoder, Message, NetworkId};

    /// Records applied ticks; the hash is the number of ticks applied.
    #[derive(Default)]
    struct Recorder {
        applied: Vec<Tick>,
    }

    impl Simulation for Recorder {
        type Input = u8;

        fn apply_tick(&mut self, tick: Tick, _inputs: &[(NetworkId, u8)]) {
            self.applied.push(tick);
        }

        fn state_hash(&self) -> u64 {
            self.applied.len() as u64
        }
    }

    struct Zero;

    impl InputSource<u8> for Zero {
        fn sample(&mut self, _tick: Tick) -> u8 {
            0
        }
    }

    struct Harness {
        clock: TickClock,
        dispatch: ClientDispatch<u8>,
        sim: Recorder,
        channel: InputChannel<u8, Zero>,
    }

    impl Harness {
        fn new(latency: u32, max_per_frame: u32) -> Self {
            let config = TickRateConfig {
                tick_rate: 30,
                forced_latency_ticks: latency,
                max_ticks_per_frame: max_per_frame,
            };
            Self {
                clock: TickClock::new("[client 1]", config).unwrap(),
                dispatch: ClientDispatch::new(),
                sim: Recorder::default(),
                channel: InputChannel::new("[client 1]", 1, Zero),
            }
        }

        fn interval(&self) -> f64 {
            self.clock.config().tick_interval()
        }

        fn advance(&mut self, dt: f64) -> FrameReport {
            self.clock
                .advance(dt, &mut self.dispatch, &mut self.sim, &mut self.channel)
                .unwrap()
        }

        fn confirm(&mut self, tick: Tick) {
            self.dispatch.push(ConfirmedTickPayload {
                tick,
                network_ids: vec![1],
                inputs: vec![0],
                desynced: false,
            });
        }

        fn sent_ticks(&mut self) -> Vec<Tick> {
            let mut decoder = FrameDecoder::<u8>::new();
            decoder.extend(&self.channel.drain().concat());
            let mut ticks = Vec::new();
            while let Some(Ok(Message::ClientTickSubmit(submit))) = decoder.next_message() {
                ticks.push(submit.tick);
            }
            ticks
        }
    }

    #[test]
    fn test_rejects_zero_latency() {
        let config = TickRateConfig {
            tick_rate: 30,
            forced_latency_ticks: 0,
            max_ticks_per_frame: 10,
        };
        assert!(matches!(
            TickClock::new("[c]", config),
            Err(ConfigError::ZeroForcedLatency)
        ));
    }

    #[test]
    fn test_priming_sends_latency_ticks_without_confirmation() {
        let mut h = Harness::new(4, 10);
        let interval = h.interval();

        for expected in 1..=4 {
            assert_eq!(h.clock.state(), ClockState::Priming);
            let report = h.advance(interval);
            assert_eq!(report.ticks_sent, 1);
            assert_eq!(report.ticks_applied, 0);
            assert_eq!(h.clock.clock().current_client_tick_to_send, expected);
        }
        assert_eq!(h.clock.state(), ClockState::Running);
        assert_eq!(h.sent_ticks(), vec![1, 2, 3, 4]);

        // Tick 5 is gated on the confirmation of tick 1
        let report = h.advance(interval);
        assert!(report.stalled);
        assert_eq!(report.ticks_sent, 0);
        assert!(h.sent_ticks().is_empty());

        h.confirm(1);
        let report = h.advance(0.0);
        assert_eq!(report.last_applied, Some(1));
        assert_eq!(h.sent_ticks(), vec![5]);
        assert_eq!(h.clock.clock().current_confirmed_tick, 1);
    }

    #[test]
    fn test_priming_does_not_run_ahead_of_time() {
        let mut h = Harness::new(4, 10);
        let interval = h.interval();
        let report = h.advance(interval / 2.0);
        assert_eq!(report.ticks_sent, 0);
        assert_approx_eq!(h.clock.clock().time_left_to_next_tick, interval / 2.0);
    }

    #[test]
    fn test_catch_up_bounded_per_frame() {
        let mut h = Harness::new(1, 10);
        let interval = h.interval();

        h.advance(interval);
        assert_eq!(h.clock.state(), ClockState::Running);
        h.sent_ticks();

        for tick in 1..=20 {
            h.confirm(tick);
        }

        let first = h.advance(20.0 * interval);
        assert_eq!(first.ticks_applied, 10);
        assert_eq!(first.last_applied, Some(10));
        assert_eq!(h.sim.applied, (1..=10).collect::<Vec<_>>());
        assert_eq!(h.dispatch.len(), 10);
        assert_approx_eq!(h.clock.clock().time_left_to_next_tick, -9.0 * interval);

        let second = h.advance(interval);
        assert_eq!(second.ticks_applied, 10);
        assert_eq!(h.sim.applied, (1..=20).collect::<Vec<_>>());
        assert_eq!(h.sent_ticks(), (2..=21).collect::<Vec<_>>());
    }

    #[test]
    fn test_stall_keeps_owed_time() {
        let mut h = Harness::new(1, 10);
        let interval = h.interval();
        h.advance(interval);

        h.advance(3.0 * interval);
        assert_approx_eq!(h.clock.clock().time_left_to_next_tick, -2.0 * interval);

        h.confirm(1);
        h.confirm(2);
        let report = h.advance(0.0);
        assert_eq!(report.ticks_applied, 2);
        assert_approx_eq!(h.clock.clock().time_left_to_next_tick, 0.0);
    }

    #[test]
    fn test_stale_tick_discarded() {
        let mut h = Harness::new(1, 10);
        let interval = h.interval();
        h.advance(interval);
        h.confirm(1);
        h.confirm(1);
        h.confirm(2);

        let report = h.advance(2.0 * interval);
        assert_eq!(report.ticks_applied, 2);
        assert_eq!(h.sim.applied, vec![1, 2]);
        assert!(h.dispatch.is_empty());
    }

    #[test]
    fn test_tick_gap_is_error() {
        let mut h = Harness::new(1, 10);
        let interval = h.interval();
        h.advance(interval);
        h.confirm(2);

        let result = h
            .clock
            .advance(interval, &mut h.dispatch, &mut h.sim, &mut h.channel);
        assert!(matches!(
            result,
            Err(ClientError::TickGap {
                expected: 1,
                found: 2
            })
        ));
    }

    #[test]
    fn test_desynced_payload_is_terminal() {
        let mut h = Harness::new(1, 10);
        let interval = h.interval();
        h.advance(interval);
        h.sent_ticks();

        h.dispatch.push(ConfirmedTickPayload {
            tick: 1,
            network_ids: vec![1],
            inputs: vec![0],
            desynced: true,
        });
        h.confirm(2);

        let report = h.advance(2.0 * interval);
        assert_eq!(report.ticks_applied, 0);
        assert!(h.clock.is_desynced());
        assert_eq!(h.clock.desync_error().and_then(|e| e.tick), Some(1));
        assert!(h.sim.applied.is_empty());

        let report = h.advance(10.0 * interval);
        assert_eq!(report, FrameReport::default());
        assert!(h.sent_ticks().is_empty());
    }

    #[test]
    fn test_mark_desynced_keeps_first_error() {
        let mut h = Harness::new(2, 10);
        h.clock.mark_desynced(DesyncError {
            tick: Some(9),
            hashes: BTreeMap::new(),
        });
        h.clock.mark_desynced(DesyncError::notice());

        assert_eq!(h.clock.desync_error().and_then(|e| e.tick), Some(9));
    }
}
