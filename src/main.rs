//! Demo server: independent rooms of scripted bots, one tokio task per room

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use slipstream_race_server::config::{ServerConfig, SimulationConfig};
use slipstream_race_server::game::catalog::Catalog;
use slipstream_race_server::game::input_buffer::InputSender;
use slipstream_race_server::game::room::RoomSimulation;
use slipstream_race_server::game::state::{PlayerId, PlayerState, RaceStatus};
use slipstream_race_server::metrics::{self, Metrics, RoomStats};
use slipstream_race_server::net::protocol::{self, AbilityRequest, ClientMessage, ControlState, InputFrame, ServerMessage};
use slipstream_race_server::physics::SimplePhysicsWorld;

/// Snapshots go out every this many ticks
const SNAPSHOT_INTERVAL_TICKS: u64 = 3;
/// Grace period for the rest of the field once someone wins
const FINISH_GRACE_MS: u64 = 10_000;
const STATS_INTERVAL: Duration = Duration::from_secs(30);

/// Scripted driver: holds the racing line with some noise and fires
/// abilities now and then
struct Bot {
    id: PlayerId,
    name: String,
    vehicle: String,
    sequence: u64,
    wander: f32,
    /// Sent `Leave` after finishing; rejoins on restart
    left: bool,
}

impl Bot {
    fn new(id: PlayerId, name: String, vehicle: String) -> Self {
        Self {
            id,
            name,
            vehicle,
            sequence: 0,
            wander: 0.0,
            left: false,
        }
    }

    fn controls(&mut self, player: &PlayerState, rng: &mut StdRng) -> ControlState {
        self.wander = (self.wander + rng.gen_range(-0.3..=0.3)).clamp(-4.0, 4.0);
        let lane_error = player.motion.position.x - self.wander;
        let target_yaw = (-lane_error * 0.03).clamp(-0.35, 0.35);

        ControlState {
            throttle: rng.gen_range(0.7..=1.0),
            steering: ((target_yaw - player.motion.rotation_y) * 2.0).clamp(-1.0, 1.0),
            brake: false,
            handbrake: rng.gen_bool(0.01),
            boost: rng.gen_bool(0.02),
            deploy: rng.gen_bool(0.01),
        }
    }

    /// Encoded message as a client would put it on the wire
    fn next_message(&mut self, player: &PlayerState, now_ms: u64, rng: &mut StdRng) -> ClientMessage {
        if player.progress.is_finished() && rng.gen_bool(0.05) {
            return ClientMessage::Leave;
        }
        if rng.gen_bool(0.01) {
            return ClientMessage::Ping { timestamp: now_ms };
        }
        if rng.gen_bool(0.002) {
            return ClientMessage::Ability(AbilityRequest::new("homing_missile"));
        }
        self.sequence += 1;
        ClientMessage::Input(InputFrame::new(self.sequence, self.controls(player, rng)))
    }
}

/// Messages the room loop handles itself instead of buffering
enum Control {
    Pong(ServerMessage),
    Leave,
}

/// Decode a client datagram and push it into the room's input buffer
fn deliver(sender: &InputSender, player_id: PlayerId, data: &[u8], now_ms: u64, metrics: &Metrics) -> Option<Control> {
    let result = match protocol::decode::<ClientMessage>(data) {
        Ok(ClientMessage::Input(frame)) => sender.send_frame(player_id, frame).map_err(|e| e.to_string()),
        Ok(ClientMessage::Ability(request)) => sender.send_ability(player_id, request).map_err(|e| e.to_string()),
        Ok(ClientMessage::Ping { timestamp }) => {
            return Some(Control::Pong(ServerMessage::Pong {
                client_timestamp: timestamp,
                server_timestamp: now_ms,
            }))
        }
        Ok(ClientMessage::Leave) => return Some(Control::Leave),
        Err(e) => Err(e.to_string()),
    };
    match result {
        Ok(()) => {
            metrics.inputs_received.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            metrics.inputs_dropped.fetch_add(1, Ordering::Relaxed);
            debug!("Dropped input from {}: {}", player_id, e);
        }
    }
    None
}

async fn run_room(
    index: usize,
    config: ServerConfig,
    sim_config: SimulationConfig,
    catalog: Arc<Catalog>,
    metrics: Arc<Metrics>,
) -> anyhow::Result<()> {
    let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(index as u64));
    let room_id = Uuid::from_u128(rng.gen());
    let tick_ms = 1000 / sim_config.tick_rate as u64;

    let mut room: RoomSimulation<SimplePhysicsWorld> =
        RoomSimulation::with_simple_physics(room_id, &config.track_id, catalog.clone(), sim_config)?;

    let vehicles: Vec<String> = catalog.vehicle_ids().map(str::to_string).collect();
    let mut bots = Vec::with_capacity(config.bots_per_room);
    for n in 0..config.bots_per_room {
        let id = Uuid::from_u128(rng.gen());
        let bot = Bot::new(id, format!("bot-{}-{}", index, n), vehicles[n % vehicles.len()].clone());
        room.add_player(id, bot.name.clone(), &bot.vehicle, 0)?;
        bots.push(bot);
    }

    let clock = Instant::now();
    let now = |clock: &Instant| clock.elapsed().as_millis() as u64;
    let mut race_started_at = now(&clock);
    let started = room.start(race_started_at)?;
    metrics.record_events(std::slice::from_ref(&started));

    let sender = room.input_sender();
    let mut ticker = interval(Duration::from_millis(tick_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_stats = Instant::now();

    loop {
        ticker.tick().await;
        let now_ms = now(&clock);

        for bot in &mut bots {
            let Some(player) = room.player(bot.id) else { continue };
            let message = bot.next_message(player, now_ms, &mut rng);
            let data = match protocol::encode(&message) {
                Ok(data) => data,
                Err(e) => {
                    warn!("Failed to encode bot input: {}", e);
                    continue;
                }
            };
            match deliver(&sender, bot.id, &data, now_ms, &metrics) {
                Some(Control::Pong(pong)) => {
                    match protocol::encode_json(&pong) {
                        Ok(json) => debug!("Pong to {} ({} bytes)", bot.id, json.len()),
                        Err(e) => warn!("Failed to encode pong: {}", e),
                    }
                }
                Some(Control::Leave) => {
                    room.remove_player(bot.id)?;
                    bot.left = true;
                }
                None => {}
            }
        }

        let tick_start = Instant::now();
        let events = room.step(now_ms);
        metrics.record_tick_time(tick_start.elapsed());
        metrics.record_events(&events);
        if !events.is_empty() {
            match protocol::encode_json(&ServerMessage::Events(events)) {
                Ok(json) => metrics.record_event_batch(json.len()),
                Err(e) => warn!("Failed to encode events: {}", e),
            }
        }

        if room.state().tick % SNAPSHOT_INTERVAL_TICKS == 0 {
            let snapshot = room.snapshot(now_ms);
            match protocol::encode_json(&ServerMessage::Snapshot(snapshot)) {
                Ok(json) => metrics.record_snapshot(json.len()),
                Err(e) => warn!("Failed to encode snapshot: {}", e),
            }
        }
        metrics.update_room(room_id, RoomStats::from_room(&room));

        let race = &room.state().race;
        let everyone_done = room.state().finished_count() == room.player_count();
        let grace_over = race
            .finished_at_ms
            .is_some_and(|finished| now_ms >= finished + FINISH_GRACE_MS);
        let timed_out = now_ms.saturating_sub(race_started_at) >= config.max_race_secs * 1000;
        if (race.status == RaceStatus::Finished && (everyone_done || grace_over)) || timed_out {
            if timed_out && race.status == RaceStatus::Running {
                info!("Room {} race timed out without a winner", room_id);
            }
            race_started_at = now_ms;
            for bot in bots.iter_mut().filter(|b| b.left) {
                room.add_player(bot.id, bot.name.clone(), &bot.vehicle, now_ms)?;
                bot.left = false;
            }
            let started = room.restart(now_ms)?;
            metrics.record_events(std::slice::from_ref(&started));
        }

        if last_stats.elapsed() >= STATS_INTERVAL {
            let order = room.race_order();
            info!(
                "Room {} stats: tick={}, players={}, projectiles={}, deployables={}, leader={:?}",
                room_id,
                room.state().tick,
                room.player_count(),
                room.state().projectiles.len(),
                room.state().deployables.len(),
                order.first()
            );
            last_stats = Instant::now();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("Slipstream Race Server v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::load_or_default();
    config.validate().map_err(anyhow::Error::msg)?;
    let sim_config = SimulationConfig::load_or_default();
    sim_config.validate().map_err(anyhow::Error::msg)?;
    info!(
        "Configuration loaded: rooms={}, bots_per_room={}, track={}, tick_rate={}",
        config.rooms, config.bots_per_room, config.track_id, sim_config.tick_rate
    );

    let catalog = Arc::new(Catalog::builtin()?);
    let metrics = Arc::new(Metrics::new());

    let metrics_clone = metrics.clone();
    let metrics_port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = metrics::start_metrics_server(metrics_clone, metrics_port).await {
            error!("Metrics server error: {}", e);
        }
    });

    let mut rooms = Vec::with_capacity(config.rooms);
    for index in 0..config.rooms {
        let (config, sim_config, catalog, metrics) =
            (config.clone(), sim_config.clone(), catalog.clone(), metrics.clone());
        rooms.push(tokio::spawn(async move {
            if let Err(e) = run_room(index, config, sim_config, catalog, metrics).await {
                error!("Room {} stopped: {}", index, e);
            }
        }));
    }
    info!("{} rooms running", rooms.len());

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }

    for room in &rooms {
        room.abort();
    }
    info!("Server stopped");

    Ok(())
}
