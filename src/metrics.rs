//! Prometheus-compatible metrics endpoint
//!
//! Default endpoint: http://localhost:9090/metrics

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::game::room::RoomSimulation;
use crate::game::state::{FxMap, RaceStatus, RoomId};
use crate::net::protocol::{RaceEvent, RaceEventKind};
use crate::physics::PhysicsWorld;

const TICK_HISTORY: usize = 1000;

/// Point-in-time counts for one room
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RoomStats {
    pub players: u64,
    pub finished_players: u64,
    pub projectiles: u64,
    pub deployables: u64,
    pub running: bool,
}

impl RoomStats {
    pub fn from_room<P: PhysicsWorld>(room: &RoomSimulation<P>) -> Self {
        let state = room.state();
        Self {
            players: state.players.len() as u64,
            finished_players: state.finished_count() as u64,
            projectiles: state.projectiles.len() as u64,
            deployables: state.deployables.len() as u64,
            running: state.race.status == RaceStatus::Running,
        }
    }
}

/// Metrics registry shared by all room tasks
#[derive(Debug)]
pub struct Metrics {
    // Tick timing (microseconds), across all rooms
    pub tick_time_us: AtomicU64,
    pub tick_time_p95_us: AtomicU64,
    pub tick_time_p99_us: AtomicU64,
    pub tick_time_max_us: AtomicU64,
    pub tick_count: AtomicU64,

    // Event counters
    pub events_total: AtomicU64,
    pub bumps_total: AtomicU64,
    pub flips_total: AtomicU64,
    pub projectile_hits_total: AtomicU64,
    pub abilities_total: AtomicU64,
    pub laps_total: AtomicU64,
    pub races_finished_total: AtomicU64,

    // Inputs and snapshots
    pub inputs_received: AtomicU64,
    pub inputs_dropped: AtomicU64,
    pub snapshots_sent: AtomicU64,
    pub snapshot_bytes: AtomicU64,
    pub event_bytes: AtomicU64,

    start_time: Instant,
    rooms: RwLock<FxMap<RoomId, RoomStats>>,
    tick_history: RwLock<VecDeque<u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            tick_time_us: AtomicU64::new(0),
            tick_time_p95_us: AtomicU64::new(0),
            tick_time_p99_us: AtomicU64::new(0),
            tick_time_max_us: AtomicU64::new(0),
            tick_count: AtomicU64::new(0),
            events_total: AtomicU64::new(0),
            bumps_total: AtomicU64::new(0),
            flips_total: AtomicU64::new(0),
            projectile_hits_total: AtomicU64::new(0),
            abilities_total: AtomicU64::new(0),
            laps_total: AtomicU64::new(0),
            races_finished_total: AtomicU64::new(0),
            inputs_received: AtomicU64::new(0),
            inputs_dropped: AtomicU64::new(0),
            snapshots_sent: AtomicU64::new(0),
            snapshot_bytes: AtomicU64::new(0),
            event_bytes: AtomicU64::new(0),
            start_time: Instant::now(),
            rooms: RwLock::new(FxMap::default()),
            tick_history: RwLock::new(VecDeque::with_capacity(TICK_HISTORY)),
        }
    }

    /// Record a tick time and update percentiles
    pub fn record_tick_time(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.tick_time_us.store(us, Ordering::Relaxed);
        self.tick_count.fetch_add(1, Ordering::Relaxed);

        let mut history = self.tick_history.write();
        history.push_back(us);
        while history.len() > TICK_HISTORY {
            history.pop_front();
        }

        if history.len() >= 10 {
            let mut sorted: Vec<u64> = history.iter().copied().collect();
            sorted.sort_unstable();

            let p95_idx = (sorted.len() as f32 * 0.95) as usize;
            let p99_idx = (sorted.len() as f32 * 0.99) as usize;

            self.tick_time_p95_us.store(sorted[p95_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.tick_time_p99_us.store(sorted[p99_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.tick_time_max_us.store(sorted.last().copied().unwrap_or(0), Ordering::Relaxed);
        }
    }

    /// Count one tick's events by kind
    pub fn record_events(&self, events: &[RaceEvent]) {
        self.events_total.fetch_add(events.len() as u64, Ordering::Relaxed);
        for event in events {
            let counter = match &event.kind {
                RaceEventKind::CollisionBump { flipped, .. } => {
                    if *flipped {
                        self.flips_total.fetch_add(1, Ordering::Relaxed);
                    }
                    &self.bumps_total
                }
                RaceEventKind::ProjectileHit { .. } => &self.projectile_hits_total,
                RaceEventKind::AbilityActivated { .. } => &self.abilities_total,
                RaceEventKind::LapCompleted { .. } => &self.laps_total,
                RaceEventKind::RaceFinished { .. } => &self.races_finished_total,
                _ => continue,
            };
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_snapshot(&self, bytes: usize) {
        self.snapshots_sent.fetch_add(1, Ordering::Relaxed);
        self.snapshot_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_event_batch(&self, bytes: usize) {
        self.event_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn update_room(&self, room_id: RoomId, stats: RoomStats) {
        self.rooms.write().insert(room_id, stats);
    }

    pub fn remove_room(&self, room_id: RoomId) {
        self.rooms.write().remove(&room_id);
    }

    /// Sum of every room's counts; `running` is true if any room is racing
    pub fn totals(&self) -> (usize, RoomStats) {
        let rooms = self.rooms.read();
        let total = rooms.values().fold(RoomStats::default(), |acc, s| RoomStats {
            players: acc.players + s.players,
            finished_players: acc.finished_players + s.finished_players,
            projectiles: acc.projectiles + s.projectiles,
            deployables: acc.deployables + s.deployables,
            running: acc.running || s.running,
        });
        (rooms.len(), total)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-format metrics output
    pub fn to_prometheus(&self) -> String {
        let mut output = String::with_capacity(4096);

        macro_rules! metric {
            ($name:expr, $help:expr, $type:expr, $value:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} {}\n{} {}\n",
                    $name, $help, $name, $type, $name, $value
                ));
            };
        }

        let (room_count, totals) = self.totals();
        let running_rooms = self.rooms.read().values().filter(|s| s.running).count();

        metric!("slipstream_rooms", "Number of live rooms", "gauge", room_count);
        metric!("slipstream_rooms_running", "Rooms with a race in progress", "gauge", running_rooms);
        metric!("slipstream_players", "Players across all rooms", "gauge", totals.players);
        metric!("slipstream_players_finished", "Players who crossed the line this race", "gauge",
            totals.finished_players);
        metric!("slipstream_projectiles", "Projectiles in flight", "gauge", totals.projectiles);
        metric!("slipstream_deployables", "Deployables on track", "gauge", totals.deployables);

        metric!("slipstream_tick_time_microseconds", "Last tick time in microseconds", "gauge",
            self.tick_time_us.load(Ordering::Relaxed));
        metric!("slipstream_tick_time_p95_microseconds", "95th percentile tick time", "gauge",
            self.tick_time_p95_us.load(Ordering::Relaxed));
        metric!("slipstream_tick_time_p99_microseconds", "99th percentile tick time", "gauge",
            self.tick_time_p99_us.load(Ordering::Relaxed));
        metric!("slipstream_tick_time_max_microseconds", "Maximum tick time in the window", "gauge",
            self.tick_time_max_us.load(Ordering::Relaxed));
        metric!("slipstream_ticks_total", "Total room ticks processed", "counter",
            self.tick_count.load(Ordering::Relaxed));

        metric!("slipstream_events_total", "Race events emitted", "counter",
            self.events_total.load(Ordering::Relaxed));
        metric!("slipstream_bumps_total", "Resolved car-to-car bumps", "counter",
            self.bumps_total.load(Ordering::Relaxed));
        metric!("slipstream_flips_total", "Bumps that flipped the victim", "counter",
            self.flips_total.load(Ordering::Relaxed));
        metric!("slipstream_projectile_hits_total", "Projectile hits", "counter",
            self.projectile_hits_total.load(Ordering::Relaxed));
        metric!("slipstream_abilities_total", "Abilities activated", "counter",
            self.abilities_total.load(Ordering::Relaxed));
        metric!("slipstream_laps_total", "Laps completed", "counter",
            self.laps_total.load(Ordering::Relaxed));
        metric!("slipstream_races_finished_total", "Races won", "counter",
            self.races_finished_total.load(Ordering::Relaxed));

        metric!("slipstream_inputs_received_total", "Input messages accepted into room buffers", "counter",
            self.inputs_received.load(Ordering::Relaxed));
        metric!("slipstream_inputs_dropped_total", "Input messages rejected (full buffer or bad payload)", "counter",
            self.inputs_dropped.load(Ordering::Relaxed));
        metric!("slipstream_snapshots_total", "Snapshots built", "counter",
            self.snapshots_sent.load(Ordering::Relaxed));
        metric!("slipstream_snapshot_bytes_total", "Encoded snapshot bytes", "counter",
            self.snapshot_bytes.load(Ordering::Relaxed));
        metric!("slipstream_event_bytes_total", "Encoded event batch bytes", "counter",
            self.event_bytes.load(Ordering::Relaxed));
        metric!("slipstream_uptime_seconds", "Server uptime in seconds", "counter",
            self.uptime_seconds());

        output
    }

    /// JSON rendering of the same counters
    pub fn to_json(&self) -> String {
        let (room_count, totals) = self.totals();
        serde_json::json!({
            "rooms": room_count,
            "players": {
                "total": totals.players,
                "finished": totals.finished_players,
            },
            "entities": {
                "projectiles": totals.projectiles,
                "deployables": totals.deployables,
            },
            "performance": {
                "tick_time_us": self.tick_time_us.load(Ordering::Relaxed),
                "tick_time_p95_us": self.tick_time_p95_us.load(Ordering::Relaxed),
                "tick_time_p99_us": self.tick_time_p99_us.load(Ordering::Relaxed),
                "tick_time_max_us": self.tick_time_max_us.load(Ordering::Relaxed),
                "tick_count": self.tick_count.load(Ordering::Relaxed),
            },
            "events": {
                "total": self.events_total.load(Ordering::Relaxed),
                "bumps": self.bumps_total.load(Ordering::Relaxed),
                "races_finished": self.races_finished_total.load(Ordering::Relaxed),
            },
            "uptime_seconds": self.uptime_seconds(),
        })
        .to_string()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn http_response(content_type: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        content_type,
        body.len(),
        body
    )
}

/// Start the metrics HTTP server
pub async fn start_metrics_server(metrics: Arc<Metrics>, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        let (mut socket, peer) = listener.accept().await?;
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 1024];

            match socket.read(&mut buffer).await {
                Ok(n) if n > 0 => {
                    let request = String::from_utf8_lossy(&buffer[..n]);

                    // Longest paths first: "/metrics" is a prefix of "/metrics/json"
                    let response = if request.starts_with("GET /metrics/json") {
                        http_response("application/json", &metrics.to_json())
                    } else if request.starts_with("GET /metrics") {
                        http_response("text/plain; version=0.0.4", &metrics.to_prometheus())
                    } else if request.starts_with("GET /health") {
                        http_response("text/plain", "OK")
                    } else {
                        "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
                    };

                    if let Err(e) = socket.write_all(response.as_bytes()).await {
                        debug!("Failed to write metrics response to {}: {}", peer, e);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Failed to read from metrics socket {}: {}", peer, e);
                }
            }
        });
    }
}
