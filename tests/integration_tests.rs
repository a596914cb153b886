//! Integration tests for the lockstep server and clients
//!
//! The in-memory tests wire a server session to several client sessions and
//! carry every message through the wire codec, so they cover the whole
//! protocol without sockets. The loopback tests run the real TCP binaries'
//! building blocks.

use assert_approx_eq::assert_approx_eq;
use client::clock::ClockState;
use client::input::ScriptedInput;
use client::session::ClientSession;
use server::session::{Outbound, Session, SessionState};
use shared::sim::{PlatformerSim, PlayerInput};
use shared::{
    ConfirmedTickPayload, Message, SessionConfig, SessionContext, Simulation, StartSession, Tick,
};

type Client = ClientSession<PlatformerSim, ScriptedInput>;

/// One server session and its clients, connected through the codec.
struct Cluster {
    server: Session<usize, PlayerInput>,
    clients: Vec<Client>,
    connected: Vec<bool>,
    interval: f64,
    /// When set, server broadcasts queue up instead of being delivered
    hold: bool,
    held: Vec<(usize, Message<PlayerInput>)>,
    submitted: Vec<(usize, Tick)>,
    released: Vec<ConfirmedTickPayload<PlayerInput>>,
}

impl Cluster {
    fn new(tick_rate: u16, forced_latency_ticks: u32, sim_seeds: &[u64]) -> Self {
        let config = SessionConfig {
            tick_rate,
            forced_latency_ticks,
            max_connections: sim_seeds.len() as u16,
            ..SessionConfig::default()
        };
        let server_ctx = SessionContext::new(config.clone(), "[server]").unwrap();
        let client_ctx = SessionContext::new(config, "[client]").unwrap();

        let clients = sim_seeds
            .iter()
            .enumerate()
            .map(|(index, &seed)| {
                ClientSession::new(
                    &client_ctx,
                    Box::new(move |start: &StartSession| PlatformerSim::new(&start.roster, seed)),
                    ScriptedInput::new(100 + index as u64),
                )
            })
            .collect();

        let mut cluster = Cluster {
            server: Session::new(&server_ctx),
            clients,
            connected: vec![true; sim_seeds.len()],
            interval: 1.0 / tick_rate as f64,
            hold: false,
            held: Vec::new(),
            submitted: Vec::new(),
            released: Vec::new(),
        };

        for conn in 0..sim_seeds.len() {
            let outbound = cluster.server.accept(conn).unwrap();
            cluster.deliver(outbound);
        }
        cluster
    }

    fn deliver(&mut self, outbound: Vec<Outbound<usize, PlayerInput>>) {
        for action in outbound {
            let Outbound::Send { to, message } = action else {
                continue;
            };
            let (message, _) =
                Message::<PlayerInput>::decode(&message.encode().unwrap()).unwrap();

            if let Message::ConfirmedTickBroadcast(payload) = &message {
                if to == 0 {
                    self.released.push(payload.clone());
                }
            }

            if self.hold {
                self.held.push((to, message));
            } else if self.connected[to] {
                self.clients[to].handle_message(message).unwrap();
            }
        }
    }

    fn release_held(&mut self) {
        self.hold = false;
        for (to, message) in std::mem::take(&mut self.held) {
            self.clients[to].handle_message(message).unwrap();
        }
    }

    /// Advances every connected client by one tick interval.
    fn frame(&mut self) {
        for conn in 0..self.clients.len() {
            if !self.connected[conn] {
                continue;
            }
            let (_, frames) = self.clients[conn].advance(self.interval).unwrap();

            for frame in frames {
                let (message, used) = Message::<PlayerInput>::decode(&frame).unwrap();
                assert_eq!(used, frame.len());
                if let Message::ClientTickSubmit(submit) = &message {
                    self.submitted.push((conn, submit.tick));
                }
                let outbound = self.server.handle_message(conn, message);
                self.deliver(outbound);
            }
        }
    }

    fn disconnect(&mut self, conn: usize) {
        self.connected[conn] = false;
        let outbound = self.server.handle_disconnect(conn);
        self.deliver(outbound);
    }

    fn confirmed(&self, conn: usize) -> Tick {
        self.clients[conn]
            .clock()
            .map_or(0, |clock| clock.clock().current_confirmed_tick)
    }
}

/// LOCKSTEP PROTOCOL TESTS
mod lockstep_tests {
    use super::*;

    /// Two clients prime ticks 1 and 2; tick 3 waits for confirmation of 1
    #[test]
    fn priming_then_gated_on_confirmation() {
        let mut cluster = Cluster::new(30, 2, &[0, 0]);
        assert_eq!(cluster.server.state(), SessionState::Running);
        assert_eq!(cluster.clients[1].network_id(), Some(2));

        cluster.hold = true;
        cluster.frame();
        cluster.frame();
        assert_eq!(cluster.submitted, vec![(0, 1), (1, 1), (0, 2), (1, 2)]);

        assert_eq!(cluster.released.len(), 2);
        let first = &cluster.released[0];
        assert_eq!(first.tick, 1);
        assert_eq!(first.network_ids, vec![1, 2]);
        assert!(!first.desynced);

        // Nothing confirmed on the clients yet, so nothing more is sent
        cluster.frame();
        assert_eq!(cluster.submitted.len(), 4);
        assert_eq!(cluster.clients[0].clock_state(), Some(ClockState::Running));

        cluster.release_held();
        cluster.frame();
        assert_eq!(cluster.submitted[4], (0, 3));
        assert_eq!(cluster.confirmed(0), 2);
        assert_eq!(cluster.confirmed(1), 2);
    }

    /// Identical simulations stay in agreement over a long run
    #[test]
    fn long_run_stays_in_sync() {
        let mut cluster = Cluster::new(30, 3, &[9, 9, 9]);

        for _ in 0..300 {
            cluster.frame();
        }

        assert!(cluster.released.iter().all(|p| !p.desynced));
        let ticks: Vec<Tick> = cluster.released.iter().map(|p| p.tick).collect();
        assert_eq!(ticks, (1..=ticks.len() as Tick).collect::<Vec<_>>());

        let confirmed = cluster.confirmed(0);
        assert!(confirmed > 250, "only {} ticks confirmed", confirmed);

        let hashes: Vec<u64> = cluster
            .clients
            .iter()
            .map(|c| c.simulation().unwrap().state_hash())
            .collect();
        assert!(hashes.windows(2).all(|w| w[0] == w[1]));
        for conn in 0..3 {
            assert_eq!(cluster.confirmed(conn), confirmed);
        }

        let clock = cluster.clients[0].clock().unwrap();
        assert_approx_eq!(clock.config().tick_interval(), 1.0 / 30.0);
        assert!(clock.clock().current_client_tick_to_send <= confirmed + 3);
    }

    /// Different simulation seeds produce different hashes on tick 1
    #[test]
    fn divergent_state_halts_everyone() {
        let mut cluster = Cluster::new(30, 2, &[1, 2]);

        for _ in 0..5 {
            cluster.frame();
        }

        assert_eq!(cluster.server.state(), SessionState::Halted);
        let record = cluster.server.desync_record().unwrap();
        assert_eq!(record.tick, 1);
        assert_eq!(record.hashes.len(), 2);

        assert_eq!(cluster.released.len(), 1);
        assert!(cluster.released[0].desynced);

        for client in &cluster.clients {
            assert!(client.is_desynced());
            assert_eq!(client.simulation().unwrap().tick, 0);
        }
    }

    /// A peer leaving mid-session unblocks the ticks it was holding up
    #[test]
    fn disconnect_does_not_stall_remaining_peers() {
        let mut cluster = Cluster::new(30, 2, &[4, 4, 4]);

        for _ in 0..20 {
            cluster.frame();
        }
        let before = cluster.confirmed(0);
        assert!(before > 10);

        cluster.disconnect(2);
        for _ in 0..20 {
            cluster.frame();
        }

        assert!(cluster.confirmed(0) >= before + 15);
        assert_eq!(cluster.confirmed(0), cluster.confirmed(1));
        let last = cluster.released.last().unwrap();
        assert_eq!(last.network_ids, vec![1, 2]);
        assert_eq!(cluster.server.state(), SessionState::Running);
    }
}

/// TCP LOOPBACK TESTS
mod loopback_tests {
    use super::*;
    use client::network::Client as TcpClient;
    use server::network::Server;
    use std::time::Duration;

    fn config() -> SessionConfig {
        SessionConfig {
            tick_rate: 60,
            forced_latency_ticks: 2,
            max_connections: 2,
            ..SessionConfig::default()
        }
    }

    /// Full stack over TCP: both clients confirm the requested number of ticks
    #[tokio::test]
    async fn two_clients_over_tcp() {
        let server_ctx = SessionContext::new(config(), "[server]").unwrap();
        let mut server = Server::<PlayerInput>::bind(server_ctx, "127.0.0.1:0")
            .await
            .unwrap();
        let addr = server.local_addr().to_string();
        let server_task =
            tokio::spawn(async move { server.run().await.map_err(|e| e.to_string()) });

        let mut tasks = Vec::new();
        for seed in [11u64, 12] {
            let ctx = SessionContext::new(config(), "[client]").unwrap();
            let session = ClientSession::new(
                &ctx,
                Box::new(|start: &StartSession| PlatformerSim::new(&start.roster, 0)),
                ScriptedInput::new(seed),
            );
            let mut client = TcpClient::connect(&ctx, &addr, session, 240).await.unwrap();

            tasks.push(tokio::spawn(async move {
                client.run(Some(60)).await.map_err(|e| e.to_string())?;
                let clock = client.session().clock().map(|c| c.clock().clone());
                Ok::<_, String>(clock)
            }));
        }

        for task in tasks {
            let result = tokio::time::timeout(Duration::from_secs(20), task)
                .await
                .expect("client timed out")
                .unwrap();
            let clock = tokio_test::assert_ok!(result).expect("session never started");
            assert!(clock.current_confirmed_tick >= 60);
        }

        let result = tokio::time::timeout(Duration::from_secs(20), server_task)
            .await
            .expect("server did not shut down")
            .unwrap();
        tokio_test::assert_ok!(result);
    }

    /// A client whose simulation diverges gets the desync error
    #[tokio::test]
    async fn desync_reported_over_tcp() {
        let server_ctx = SessionContext::new(config(), "[server]").unwrap();
        let mut server = Server::<PlayerInput>::bind(server_ctx, "127.0.0.1:0")
            .await
            .unwrap();
        let addr = server.local_addr().to_string();
        tokio::spawn(async move {
            let _ = server.run().await;
        });

        let mut tasks = Vec::new();
        for sim_seed in [1u64, 2] {
            let ctx = SessionContext::new(config(), "[client]").unwrap();
            let session = ClientSession::new(
                &ctx,
                Box::new(move |start: &StartSession| PlatformerSim::new(&start.roster, sim_seed)),
                ScriptedInput::new(sim_seed),
            );
            let mut client = TcpClient::connect(&ctx, &addr, session, 240).await.unwrap();
            tasks.push(tokio::spawn(async move {
                client.run(Some(600)).await.map_err(|e| e.to_string())
            }));
        }

        for task in tasks {
            let result = tokio::time::timeout(Duration::from_secs(20), task)
                .await
                .expect("client timed out")
                .unwrap();
            let err = result.unwrap_err();
            assert!(err.contains("desync"), "unexpected error: {}", err);
        }
    }
}
