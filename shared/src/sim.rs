//! Integer-only platformer used as the simulation collaborator.
//!
//! Positions and velocities are in milli-pixels and change once per tick, so
//! the simulation is bit-for-bit reproducible on every machine. Game rules are
//! not part of the lockstep core; this exists to give the binaries and tests
//! something deterministic to drive.

use crate::hash::{combine, header_hash, parallel_shard_hash, StateHasher, StateShard};
use crate::{NetworkId, Simulation, Tick};
use serde::{Deserialize, Serialize};

pub const GRAVITY: i32 = 900;
pub const PLAYER_SPEED: i32 = 5_000;
pub const JUMP_VELOCITY: i32 = -14_000;
pub const FLOOR_Y: i32 = 550_000;
pub const WORLD_WIDTH: i32 = 800_000;
pub const PLAYER_SIZE: i32 = 32_000;

/// Per-tick input of one player. Three fixed one-byte fields on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerInput {
    pub left: bool,
    pub right: bool,
    pub jump: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    pub id: NetworkId,
    pub x: i32,
    pub y: i32,
    pub vel_x: i32,
    pub vel_y: i32,
    pub on_ground: bool,
}

impl Player {
    pub fn new(id: NetworkId, x: i32, y: i32) -> Self {
        Self {
            id,
            x,
            y,
            vel_x: 0,
            vel_y: 0,
            on_ground: true,
        }
    }

    pub fn bounds(&self) -> (i32, i32, i32, i32) {
        (self.x, self.y, self.x + PLAYER_SIZE, self.y + PLAYER_SIZE)
    }

    fn apply_input(&mut self, input: &PlayerInput) {
        self.vel_x = 0;
        if input.left {
            self.vel_x -= PLAYER_SPEED;
        }
        if input.right {
            self.vel_x += PLAYER_SPEED;
        }

        if input.jump && self.on_ground {
            self.vel_y = JUMP_VELOCITY;
            self.on_ground = false;
        }
    }

    fn step(&mut self) {
        if !self.on_ground {
            self.vel_y += GRAVITY;
        }

        self.x = (self.x + self.vel_x).clamp(0, WORLD_WIDTH - PLAYER_SIZE);
        self.y += self.vel_y;

        if self.y + PLAYER_SIZE >= FLOOR_Y {
            self.y = FLOOR_Y - PLAYER_SIZE;
            self.vel_y = 0;
            self.on_ground = true;
        }

        if self.y <= 0 {
            self.y = 0;
            self.vel_y = 0;
        }
    }
}

impl StateShard for Player {
    fn shard_key(&self) -> u64 {
        self.id as u64
    }

    fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_i32(self.x);
        hasher.update_i32(self.y);
        hasher.update_i32(self.vel_x);
        hasher.update_i32(self.vel_y);
        hasher.update_bool(self.on_ground);
    }
}

pub fn check_collision(a: &Player, b: &Player) -> bool {
    let (x1, y1, x2, y2) = a.bounds();
    let (x3, y3, x4, y4) = b.bounds();

    !(x2 <= x3 || x4 <= x1 || y2 <= y3 || y4 <= y1)
}

/// Pushes two overlapping players apart horizontally and trades velocities.
pub fn resolve_collision(a: &mut Player, b: &mut Player) {
    if !check_collision(a, b) {
        return;
    }

    let overlap = PLAYER_SIZE - (b.x - a.x).abs();
    let half = overlap / 2 + 1;
    // Lower id yields left on a perfect tie so every peer agrees.
    if a.x < b.x || (a.x == b.x && a.id < b.id) {
        a.x -= half;
        b.x += half;
    } else {
        a.x += half;
        b.x -= half;
    }
    a.x = a.x.clamp(0, WORLD_WIDTH - PLAYER_SIZE);
    b.x = b.x.clamp(0, WORLD_WIDTH - PLAYER_SIZE);

    let (vx, vy) = (a.vel_x, a.vel_y);
    a.vel_x = b.vel_x * 4 / 5;
    a.vel_y = b.vel_y * 4 / 5;
    b.vel_x = vx * 4 / 5;
    b.vel_y = vy * 4 / 5;
}

/// The demo simulation. Players are kept sorted by id.
#[derive(Debug, Clone)]
pub struct PlatformerSim {
    pub tick: Tick,
    pub seed: u64,
    pub players: Vec<Player>,
}

impl PlatformerSim {
    pub fn new(roster: &[NetworkId], seed: u64) -> Self {
        let mut players: Vec<Player> = roster
            .iter()
            .map(|&id| {
                let offset = (id as i64 * 60_000) % (WORLD_WIDTH - 200_000) as i64;
                let spawn_x = 100_000 + offset as i32;
                Player::new(id, spawn_x, FLOOR_Y - PLAYER_SIZE)
            })
            .collect();
        players.sort_by_key(|p| p.id);
        players.dedup_by_key(|p| p.id);

        Self {
            tick: 0,
            seed,
            players,
        }
    }

    pub fn player(&self, id: NetworkId) -> Option<&Player> {
        self.players
            .binary_search_by_key(&id, |p| p.id)
            .ok()
            .map(|index| &self.players[index])
    }

    fn handle_collisions(&mut self) {
        for i in 0..self.players.len() {
            for j in (i + 1)..self.players.len() {
                let (left, right) = self.players.split_at_mut(j);
                resolve_collision(&mut left[i], &mut right[0]);
            }
        }
    }
}

impl Simulation for PlatformerSim {
    type Input = PlayerInput;

    fn apply_tick(&mut self, tick: Tick, inputs: &[(NetworkId, PlayerInput)]) {
        for (id, input) in inputs {
            if let Ok(index) = self.players.binary_search_by_key(id, |p| p.id) {
                self.players[index].apply_input(input);
            }
        }

        for player in &mut self.players {
            player.step();
        }
        self.handle_collisions();
        self.tick = tick;
    }

    fn state_hash(&self) -> u64 {
        combine(
            header_hash(self.tick, self.seed),
            parallel_shard_hash(&self.players),
        )
    }
}
