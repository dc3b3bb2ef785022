mod access;
mod config;
mod devices;
#[cfg(feature = "gpio")]
mod gpio;
mod hal;
mod protocol;
mod scheduler;
mod sensors;
#[cfg(all(feature = "sim", not(feature = "gpio")))]
mod sim;
mod smoothing;
mod state;

#[cfg(not(any(feature = "sim", feature = "gpio")))]
compile_error!("enable either the `sim` or the `gpio` feature");

use anyhow::Result;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::{env, time::Duration, time::Instant};
use tokio::time::{sleep, timeout};
use tracing::{info, warn};

use config::Config;
use hal::Hardware;
use protocol::Outbox;
use scheduler::Scheduler;
use state::{AppState, LockMethod, Origin};

/// Network servicing budget per tick; the scheduler must never wait longer
/// than this on the event loop.
const POLL_BUDGET: Duration = Duration::from_millis(100);
/// Pause between reconnect attempts after a transport error.
const RECONNECT_DELAY: Duration = Duration::from_secs(2);
/// Idle pacing while the transport is down, so the tick loop keeps running
/// without spinning.
const IDLE_TICK: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// Startup
// ---------------------------------------------------------------------------

/// Override config-file MQTT settings from the environment.
fn apply_env_overrides(cfg: &mut Config, host: Option<String>, port: Option<String>) {
    if let Some(host) = host {
        cfg.mqtt.host = host;
    }
    if let Some(port) = port.and_then(|s| s.parse().ok()) {
        cfg.mqtt.port = port;
    }
}

fn load_config() -> Result<Config> {
    let path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let mut cfg = if std::path::Path::new(&path).exists() {
        config::load(&path)?
    } else {
        info!(path, "no config file — using defaults");
        Config::default()
    };
    apply_env_overrides(&mut cfg, env::var("MQTT_HOST").ok(), env::var("MQTT_PORT").ok());
    Ok(cfg)
}

#[cfg(feature = "gpio")]
fn build_hardware(cfg: &Config) -> Result<gpio::GpioHardware> {
    gpio::GpioHardware::new(&cfg.gpio)
}

#[cfg(all(feature = "sim", not(feature = "gpio")))]
fn build_hardware(_cfg: &Config) -> Result<sim::SimHardware> {
    Ok(sim::SimHardware::from_env())
}

/// Drive every actuator to its fail-safe position and queue the startup
/// status set, so backend state converges after a device restart.
fn startup_failsafe<H: Hardware>(state: &AppState, hw: &mut H, out: &mut Outbox) {
    hw.set_lamp(false);
    hw.set_curtain(false);
    hw.set_buzzer(false);
    hw.set_lock(true);

    out.push(protocol::lamp_status(false, state.lamp.mode, Origin::Manual));
    out.push(protocol::curtain_status(false, state.curtain.mode, Origin::Manual));
    out.push(protocol::door_status(true, LockMethod::Startup));
    access::refresh_display(state, hw);
}

// ---------------------------------------------------------------------------
// Main loop
// ---------------------------------------------------------------------------

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = load_config()?;
    let mut hw = build_hardware(&cfg)?;

    let now = Instant::now();
    let mut state = AppState::new(&cfg, now);
    let mut sched = Scheduler::new(now, &cfg);
    let mut out = Outbox::default();

    startup_failsafe(&state, &mut hw, &mut out);

    let mut mqttoptions =
        MqttOptions::new(cfg.mqtt.client_id.clone(), cfg.mqtt.host.clone(), cfg.mqtt.port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));
    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 20);

    info!(
        host = %cfg.mqtt.host,
        port = cfg.mqtt.port,
        client_id = %cfg.mqtt.client_id,
        "device controller starting"
    );

    // Transport reconnect gate: while set, the event loop is left alone and
    // ticks run on idle pacing. Actuators keep their last commanded state.
    let mut net_retry_at: Option<Instant> = None;

    loop {
        if net_retry_at.is_none_or(|at| Instant::now() >= at) {
            net_retry_at = None;
            match timeout(POLL_BUDGET, eventloop.poll()).await {
                Ok(Ok(Event::Incoming(Packet::ConnAck(_)))) => {
                    info!("mqtt connected");
                    // A subscribe failure must not end the tick loop; treat
                    // it like any other transport error.
                    for topic in [protocol::TOPIC_CONTROL_FILTER, protocol::TOPIC_PIN_RESPONSE] {
                        if let Err(e) = client.subscribe(topic, QoS::AtLeastOnce).await {
                            warn!(topic, "subscribe failed: {e} — reconnecting");
                            net_retry_at = Some(Instant::now() + RECONNECT_DELAY);
                            break;
                        }
                    }
                }
                Ok(Ok(Event::Incoming(Packet::Publish(p)))) => {
                    protocol::handle_inbound(
                        &mut state,
                        &mut hw,
                        &mut out,
                        &cfg,
                        Instant::now(),
                        &p.topic,
                        &p.payload,
                    );
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    warn!("mqtt error: {e} — reconnecting");
                    net_retry_at = Some(Instant::now() + RECONNECT_DELAY);
                }
                Err(_) => {} // no network events within the budget
            }
        } else {
            sleep(IDLE_TICK).await;
        }

        sched.tick(&mut state, &mut hw, &mut out, &cfg, Instant::now());

        for msg in out.drain() {
            if let Err(e) = client.try_publish(msg.topic, QoS::AtLeastOnce, false, msg.payload) {
                warn!(topic = msg.topic, "publish failed: {e}");
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use hal::MockHardware;

    // -- Env overrides --------------------------------------------------------

    #[test]
    fn env_overrides_replace_mqtt_settings() {
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg, Some("10.0.0.5".into()), Some("8883".into()));
        assert_eq!(cfg.mqtt.host, "10.0.0.5");
        assert_eq!(cfg.mqtt.port, 8883);
    }

    #[test]
    fn unparseable_port_keeps_config_value() {
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg, None, Some("not-a-port".into()));
        assert_eq!(cfg.mqtt.host, "127.0.0.1");
        assert_eq!(cfg.mqtt.port, 1883);
    }

    // -- Startup fail-safe -------------------------------------------------------

    #[test]
    fn startup_drives_failsafe_and_publishes_statuses() {
        let cfg = Config::default();
        let state = AppState::new(&cfg, Instant::now());
        let mut hw = MockHardware::new();
        let mut out = Outbox::default();

        startup_failsafe(&state, &mut hw, &mut out);

        assert_eq!(hw.lamp_calls, vec![false]);
        assert_eq!(hw.curtain_calls, vec![false]);
        assert_eq!(hw.buzzer_calls, vec![false]);
        assert_eq!(hw.lock_calls, vec![true]);
        assert_eq!(hw.lines[0], "Door: LOCKED");

        let msgs = out.drain();
        let topics: Vec<&str> = msgs.iter().map(|m| m.topic).collect();
        assert_eq!(
            topics,
            vec![
                protocol::TOPIC_STATUS_LAMP,
                protocol::TOPIC_STATUS_CURTAIN,
                protocol::TOPIC_STATUS_DOOR,
            ]
        );
        let door: serde_json::Value = serde_json::from_slice(&msgs[2].payload).unwrap();
        assert_eq!(door["status"], "locked");
        assert_eq!(door["method"], "startup");
    }
}
