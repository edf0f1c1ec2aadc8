//! Connection lifecycle against the simulated controller

use std::sync::{Arc, Mutex};
use std::time::Duration;

use dreamscaler_core::cleanup::CleanupHook;
use dreamscaler_core::pixel::Rgbw;
use dreamscaler_core::protocol::release_port_with;
use dreamscaler_core::protocol::sim::{OpenRecord, SimulatedOpener};
use dreamscaler_core::protocol::{
    Connection, ConnectionConfig, ConnectionState, DeviceInfo, ErrorCode, ProtocolError,
    TrafficStats,
};
use dreamscaler_core::sink::PixelSink;
use pretty_assertions::assert_eq;

const PORT: &str = "/dev/ttyACM0";

fn fast_config() -> ConnectionConfig {
    ConnectionConfig {
        boot_settle_ms: 0,
        release_delay_ms: 0,
        ..ConnectionConfig::new(PORT)
    }
}

fn controller(led_count: u16) -> SimulatedOpener {
    SimulatedOpener::new(DeviceInfo {
        protocol_version: 1,
        led_count,
        led_pin: 6,
        initialized: true,
        brightness: 255,
    })
}

fn open(baud_rate: u32) -> OpenRecord {
    OpenRecord {
        port_name: PORT.to_string(),
        baud_rate,
        exclusive: false,
    }
}

fn connected(sim: &SimulatedOpener) -> Connection {
    let mut conn = Connection::with_opener(fast_config(), sim.clone());
    conn.connect().unwrap();
    conn
}

#[test]
fn test_connect_reads_info() {
    let sim = controller(107);
    let mut conn = Connection::with_opener(fast_config(), sim.clone());

    let info = conn.connect().unwrap();
    assert_eq!(conn.state(), ConnectionState::Connected);
    assert_eq!(info.led_count, 107);
    assert_eq!(conn.led_count(), 107);
    assert_eq!(conn.device_info(), Some(&info));
    // PING then GET_INFO, boot banner never read as a response
    assert_eq!(sim.received(), vec![0x01, 0x02]);
}

#[test]
fn test_connect_twice_rejected() {
    let sim = controller(8);
    let mut conn = connected(&sim);
    assert!(matches!(conn.connect(), Err(ProtocolError::AlreadyConnected)));
    assert!(conn.is_connected());
}

#[test]
fn test_connect_unresponsive_releases_port() {
    let sim = controller(8);
    sim.set_unresponsive(true);
    let mut conn = Connection::with_opener(fast_config(), sim.clone());

    let err = conn.connect().unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert!(conn.device_info().is_none());
    assert_eq!(sim.opens(), vec![open(115200), open(9600)]);
}

#[test]
fn test_connect_open_failure() {
    let sim = controller(8);
    sim.fail_next_opens(1);
    let mut conn = Connection::with_opener(fast_config(), sim.clone());

    let err = conn.connect().unwrap_err();
    assert!(matches!(err, ProtocolError::ConnectionFailed(_)));
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert_eq!(sim.opens().len(), 1);
}

#[test]
fn test_disconnect_clears_and_releases_once() {
    let sim = controller(8);
    let mut conn = connected(&sim);
    conn.set_all(Rgbw::from_rgb(10, 20, 30)).unwrap();

    conn.disconnect();
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert!(sim.shown_frame().iter().all(Rgbw::is_off));
    assert_eq!(sim.opens(), vec![open(115200), open(9600)]);

    conn.disconnect();
    assert_eq!(sim.opens().len(), 2);
    assert!(matches!(conn.ping(), Err(ProtocolError::NotConnected)));
}

#[test]
fn test_disconnect_without_clear() {
    let sim = controller(8);
    let config = ConnectionConfig {
        clear_on_disconnect: false,
        ..fast_config()
    };
    let mut conn = Connection::with_opener(config, sim.clone());
    conn.connect().unwrap();
    conn.set_all(Rgbw::white(40)).unwrap();

    conn.disconnect();
    assert_eq!(sim.shown_frame(), vec![Rgbw::white(40); 8]);
}

#[test]
fn test_reconnect_after_disconnect() {
    let sim = controller(8);
    let mut conn = connected(&sim);
    conn.disconnect();
    conn.connect().unwrap();
    assert!(conn.is_connected());
    assert_eq!(sim.opens().len(), 3);
}

#[test]
fn test_drop_disconnects() {
    let sim = controller(8);
    {
        let _conn = connected(&sim);
    }
    assert_eq!(sim.opens(), vec![open(115200), open(9600)]);
}

#[test]
fn test_bulk_frame_shown() {
    let sim = controller(107);
    let mut conn = connected(&sim);
    let frame: Vec<Rgbw> = (0..107u8).map(|i| Rgbw::new(i, 0, 255 - i, 0)).collect();

    conn.bulk_update(&frame).unwrap();
    assert_eq!(sim.shown_frame(), frame);
    assert_eq!(conn.stats().bulk_frames, 1);
}

#[test]
fn test_bulk_too_long_then_recovers() {
    let sim = controller(107);
    let mut conn = connected(&sim);
    let before = sim.received().len();

    let err = conn.bulk_update(&vec![Rgbw::white(1); 108]).unwrap_err();
    assert!(matches!(err, ProtocolError::DeviceError(ErrorCode::OutOfRange)));
    // Header only
    assert_eq!(sim.received().len(), before + 3);

    conn.ping().unwrap();
    conn.bulk_update(&vec![Rgbw::white(2); 107]).unwrap();
    assert_eq!(conn.stats().bulk_frames, 1);
}

#[test]
fn test_empty_bulk_frame() {
    let sim = controller(8);
    let mut conn = connected(&sim);
    conn.bulk_update(&[]).unwrap();
    conn.ping().unwrap();
}

#[test]
fn test_configuration_updates_cached_info() {
    let sim = controller(144);
    let mut conn = connected(&sim);

    conn.set_brightness(64).unwrap();
    conn.set_led_pin(5).unwrap();
    conn.set_led_count(107).unwrap();
    conn.init_strip().unwrap();

    let cached = *conn.device_info().unwrap();
    assert_eq!(cached.brightness, 64);
    assert_eq!(cached.led_pin, 5);
    assert_eq!(cached.led_count, 107);
    assert_eq!(conn.get_info().unwrap(), cached);
}

#[test]
fn test_pixel_commands() {
    let sim = controller(10);
    let mut conn = connected(&sim);

    conn.set_pixel(0, Rgbw::new(255, 0, 0, 0)).unwrap();
    conn.set_pixel_rgb(1, 0, 255, 0).unwrap();
    conn.set_pixel_white(2, 128).unwrap();
    conn.set_range(5, 7, Rgbw::from_rgb(0, 0, 9)).unwrap();

    let frame = sim.shown_frame();
    assert_eq!(frame[0], Rgbw::new(255, 0, 0, 0));
    assert_eq!(frame[1], Rgbw::from_rgb(0, 255, 0));
    assert_eq!(frame[2], Rgbw::white(128));
    assert_eq!(&frame[5..=7], &[Rgbw::from_rgb(0, 0, 9); 3]);
    assert_eq!(frame[8], Rgbw::OFF);

    let err = conn.set_pixel(10, Rgbw::OFF).unwrap_err();
    assert!(matches!(err, ProtocolError::DeviceError(ErrorCode::OutOfRange)));
}

#[test]
fn test_buffer_and_stream_modes() {
    let sim = controller(4);
    let mut conn = connected(&sim);

    conn.buffer_update(&[(3, Rgbw::white(3))]).unwrap();
    assert_eq!(sim.shown_frame()[3], Rgbw::white(3));

    let frame = [Rgbw::white(1), Rgbw::white(2), Rgbw::white(3), Rgbw::white(4)];
    conn.stream_update(&frame).unwrap();
    assert_eq!(sim.shown_frame(), frame.to_vec());
}

#[test]
fn test_pixel_sink_for_connection() {
    let sim = controller(3);
    let mut conn = connected(&sim);

    assert_eq!(PixelSink::pixel_count(&conn), 3);
    conn.show_frame(&[Rgbw::white(7); 3]).unwrap();
    assert_eq!(sim.shown_frame(), vec![Rgbw::white(7); 3]);
    PixelSink::clear(&mut conn).unwrap();
    assert!(sim.shown_frame().iter().all(Rgbw::is_off));
}

#[test]
fn test_cleanup_hook_idempotent() {
    let sim = controller(8);
    let conn = Arc::new(Mutex::new(connected(&sim)));
    conn.lock().unwrap().set_all(Rgbw::white(255)).unwrap();

    let hook = CleanupHook::new(Arc::clone(&conn));
    hook.run();
    assert!(!conn.lock().unwrap().is_connected());
    assert!(sim.shown_frame().iter().all(Rgbw::is_off));
    assert_eq!(sim.opens().len(), 2);
    // PING, GET_INFO, SET_ALL, then a single CLEAR_ALL
    assert_eq!(conn.lock().unwrap().stats().commands, 4);
    assert_eq!(sim.received().last(), Some(&0x32));

    hook.run();
    assert_eq!(sim.opens().len(), 2);
}

#[test]
fn test_cleanup_hook_clears_without_clear_on_disconnect() {
    let sim = controller(8);
    let config = ConnectionConfig {
        clear_on_disconnect: false,
        ..fast_config()
    };
    let mut conn = Connection::with_opener(config, sim.clone());
    conn.connect().unwrap();
    conn.set_all(Rgbw::white(40)).unwrap();
    let conn = Arc::new(Mutex::new(conn));

    CleanupHook::new(Arc::clone(&conn)).run();
    assert!(sim.shown_frame().iter().all(Rgbw::is_off));
    assert_eq!(conn.lock().unwrap().stats().commands, 4);
}

#[test]
fn test_traffic_counts_real_bytes() {
    let sim = controller(8);
    let mut conn = connected(&sim);
    // PING and GET_INFO: 2 bytes out, PONG + 7-byte INFO back
    assert_eq!(
        conn.stats(),
        TrafficStats {
            tx_bytes: 2,
            rx_bytes: 8,
            commands: 2,
            bulk_frames: 0,
        }
    );

    conn.set_pixel(0, Rgbw::white(1)).unwrap();
    let err = conn.set_pixel(500, Rgbw::white(1)).unwrap_err();
    assert!(matches!(err, ProtocolError::DeviceError(ErrorCode::OutOfRange)));
    conn.bulk_update(&[Rgbw::white(2); 3]).unwrap();
    assert_eq!(
        conn.stats(),
        TrafficStats {
            tx_bytes: 2 + 7 + 7 + 3 + 12,
            rx_bytes: 8 + 1 + 2 + 2,
            commands: 4,
            bulk_frames: 1,
        }
    );

    // CLEAR_ALL on the way out; totals survive the close
    conn.disconnect();
    let stats = conn.stats();
    assert_eq!((stats.tx_bytes, stats.rx_bytes, stats.commands), (32, 14, 5));
    assert_eq!(stats.tx_bytes, sim.received().len() as u64);
}

#[test]
fn test_cleanup_hook_during_connect_waits_then_releases() {
    let sim = controller(8);
    let config = ConnectionConfig {
        boot_settle_ms: 200,
        ..fast_config()
    };
    let conn = Arc::new(Mutex::new(Connection::with_opener(config, sim.clone())));
    let hook = CleanupHook::new(Arc::clone(&conn));

    let connecting = {
        let conn = Arc::clone(&conn);
        std::thread::spawn(move || conn.lock().unwrap().connect().map(|info| info.led_count))
    };
    std::thread::sleep(Duration::from_millis(50));
    hook.run();

    assert_eq!(connecting.join().unwrap().unwrap(), 8);
    assert_eq!(conn.lock().unwrap().state(), ConnectionState::Disconnected);
    assert_eq!(sim.opens(), vec![open(115200), open(9600)]);
}

#[test]
fn test_cleanup_guard_runs_on_drop() {
    let sim = controller(8);
    let conn = Arc::new(Mutex::new(connected(&sim)));
    {
        let _guard = CleanupHook::new(Arc::clone(&conn)).guard();
    }
    assert_eq!(conn.lock().unwrap().state(), ConnectionState::Disconnected);
}

#[test]
fn test_release_port_attempt_order() {
    let mut sim = controller(8);
    sim.fail_next_opens(2);

    assert!(release_port_with(&mut sim, PORT, Duration::ZERO));
    let attempts: Vec<(u32, bool)> = sim
        .opens()
        .iter()
        .map(|o| (o.baud_rate, o.exclusive))
        .collect();
    assert_eq!(attempts, vec![(115200, false), (9600, false), (115200, true)]);
}

#[test]
fn test_release_port_all_attempts_fail() {
    let mut sim = controller(8);
    sim.fail_next_opens(3);
    assert!(!release_port_with(&mut sim, PORT, Duration::ZERO));
    assert_eq!(sim.opens().len(), 3);
}

#[test]
fn test_release_port_first_attempt() {
    let mut sim = controller(8);
    assert!(release_port_with(&mut sim, PORT, Duration::ZERO));
    assert_eq!(sim.opens(), vec![open(115200)]);
}
