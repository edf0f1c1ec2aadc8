//! Hardware tests and demos behind the menu

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use dreamscaler_core::pixel::Rgbw;
use dreamscaler_core::protocol::Connection;
use tracing::{debug, info, warn};

use crate::effects::{self, animate};
use crate::keymap;

/// Everything a demo needs besides the connection
pub struct DemoContext {
    /// Cleared by the signal handler
    pub running: Arc<AtomicBool>,
    /// How long each animated effect runs
    pub effect_duration: Duration,
    /// Print device info as JSON
    pub json: bool,
}

impl DemoContext {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Sleep, waking early if asked to stop. Returns whether to go on.
    pub fn pause(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        while self.is_running() {
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(Duration::from_millis(50)));
        }
        false
    }
}

fn last_index(conn: &Connection) -> u16 {
    conn.led_count().saturating_sub(1)
}

pub fn ping(conn: &mut Connection) -> Result<()> {
    let start = Instant::now();
    conn.ping().context("no answer to PING")?;
    println!("PONG in {:.1} ms", start.elapsed().as_secs_f64() * 1000.0);
    Ok(())
}

pub fn device_info(conn: &mut Connection, ctx: &DemoContext) -> Result<()> {
    let info = conn.get_info()?;
    if ctx.json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("Protocol version: {}", info.protocol_version);
    println!("LED count:        {}", info.led_count);
    println!("Data pin:         {}", info.led_pin);
    println!("Initialized:      {}", info.initialized);
    println!("Brightness:       {}", info.brightness);
    Ok(())
}

pub fn single_leds(conn: &mut Connection, ctx: &DemoContext) -> Result<()> {
    let colors = [
        ("red", Rgbw::from_rgb(255, 0, 0)),
        ("green", Rgbw::from_rgb(0, 255, 0)),
        ("blue", Rgbw::from_rgb(0, 0, 255)),
        ("white", Rgbw::white(100)),
    ];

    for (name, color) in colors {
        println!("  LED 0: {name}");
        conn.set_pixel(0, color)?;
        if !ctx.pause(Duration::from_millis(500)) {
            break;
        }
    }
    conn.clear_all()?;
    Ok(())
}

pub fn basic(conn: &mut Connection, ctx: &DemoContext) -> Result<()> {
    let steps = [
        ("red LED 0", 0, Rgbw::from_rgb(255, 0, 0)),
        ("green LED 1", 1, Rgbw::from_rgb(0, 255, 0)),
        ("blue LED 2", 2, Rgbw::from_rgb(0, 0, 255)),
        ("white LED 3", 3, Rgbw::white(255)),
    ];

    for (label, index, color) in steps {
        println!("  {label}");
        conn.set_pixel(index, color)?;
        if !ctx.pause(Duration::from_secs(1)) {
            break;
        }
    }
    ctx.pause(Duration::from_secs(1));
    conn.clear_all()?;
    Ok(())
}

pub fn ranges(conn: &mut Connection, ctx: &DemoContext) -> Result<()> {
    let count = conn.led_count();
    let third = count / 3;
    if third == 0 {
        warn!("strip too short for thirds");
        return Ok(());
    }

    let parts = [
        ("first third: red", 0, third - 1, Rgbw::from_rgb(255, 0, 0)),
        ("second third: green", third, 2 * third - 1, Rgbw::from_rgb(0, 255, 0)),
        ("last third: blue", 2 * third, count - 1, Rgbw::from_rgb(0, 0, 255)),
    ];
    for (label, start, end, color) in parts {
        println!("  {label}");
        conn.set_range(start, end, color)?;
        if !ctx.pause(Duration::from_secs(1)) {
            break;
        }
    }
    ctx.pause(Duration::from_secs(1));
    conn.clear_all()?;
    Ok(())
}

pub fn gradients(conn: &mut Connection, ctx: &DemoContext) -> Result<()> {
    let end = last_index(conn);
    let gradients = [
        ("red -> blue", Rgbw::from_rgb(255, 0, 0), Rgbw::from_rgb(0, 0, 255)),
        ("green -> yellow", Rgbw::from_rgb(0, 255, 0), Rgbw::from_rgb(255, 255, 0)),
        ("blue -> white", Rgbw::from_rgb(0, 0, 255), Rgbw::white(255)),
    ];

    for (label, from, to) in gradients {
        println!("  {label}");
        conn.fill_gradient(0, end, from, to)?;
        if !ctx.pause(Duration::from_secs(2)) {
            break;
        }
    }
    conn.clear_all()?;
    Ok(())
}

pub fn brightness(conn: &mut Connection, ctx: &DemoContext) -> Result<()> {
    let levels = (0..=255u8).step_by(5).chain((0..=255u8).rev().step_by(5));
    println!("  fade in, fade out");
    for level in levels {
        if !ctx.is_running() {
            break;
        }
        conn.set_brightness(level)?;
        conn.set_all(Rgbw::white(255))?;
        std::thread::sleep(Duration::from_millis(10));
    }
    conn.set_brightness(255)?;
    conn.clear_all()?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Rainbow,
    KnightRider,
    Fire,
    Sparkle,
    Wave,
    ColorCycle,
    TheaterChase,
}

impl Effect {
    pub fn name(self) -> &'static str {
        match self {
            Effect::Rainbow => "Rainbow",
            Effect::KnightRider => "Knight rider",
            Effect::Fire => "Fire",
            Effect::Sparkle => "Sparkle",
            Effect::Wave => "Wave",
            Effect::ColorCycle => "Color cycle",
            Effect::TheaterChase => "Theater chase",
        }
    }

    fn frame_delay(self) -> Duration {
        Duration::from_millis(match self {
            Effect::Rainbow | Effect::ColorCycle => 20,
            Effect::KnightRider => 10,
            Effect::Fire | Effect::Sparkle => 50,
            Effect::Wave => 30,
            Effect::TheaterChase => 100,
        })
    }
}

pub fn effect(
    conn: &mut Connection,
    ctx: &DemoContext,
    effect: Effect,
    duration: Duration,
) -> Result<()> {
    let mut rng = rand::thread_rng();
    let running = ctx.running.as_ref();
    let delay = effect.frame_delay();

    let result = match effect {
        Effect::Rainbow => animate(conn, running, duration, delay, effects::rainbow),
        Effect::KnightRider => animate(conn, running, duration, delay, effects::knight_rider),
        Effect::Fire => animate(conn, running, duration, delay, |_, px| {
            effects::fire(&mut rng, px)
        }),
        Effect::Sparkle => animate(conn, running, duration, delay, |_, px| {
            effects::sparkle(&mut rng, px)
        }),
        Effect::Wave => animate(conn, running, duration, delay, effects::wave),
        Effect::ColorCycle => animate(conn, running, duration, delay, effects::color_cycle),
        Effect::TheaterChase => animate(conn, running, duration, delay, effects::theater_chase),
    };

    let frames = result.with_context(|| format!("{} aborted", effect.name()))?;
    let secs = duration.as_secs_f64().max(f64::EPSILON);
    println!("  {frames} frames ({:.1} FPS)", frames as f64 / secs);
    conn.clear_all()?;
    Ok(())
}

pub fn piano_layout(conn: &mut Connection, ctx: &DemoContext) -> Result<()> {
    let count = conn.led_count();
    let layout = keymap::layout(count);
    println!("  white keys: white LED, black keys: green");
    for key in keymap::KEYS.iter().filter(|k| k.led < count) {
        debug!(led = key.led, "{}", key.name());
    }
    conn.buffer_update(&layout)?;
    println!("  {} keys shown", layout.len());
    ctx.pause(Duration::from_secs(3));
    conn.clear_all()?;
    Ok(())
}

const PERF_ITERATIONS: u32 = 100;

fn measure(
    label: &str,
    ctx: &DemoContext,
    mut step: impl FnMut() -> Result<()>,
) -> Result<()> {
    let start = Instant::now();
    let mut done = 0u32;
    while done < PERF_ITERATIONS && ctx.is_running() {
        step()?;
        done += 1;
    }
    let elapsed = start.elapsed().as_secs_f64().max(f64::EPSILON);
    println!(
        "  {label}: {done} updates in {elapsed:.2}s = {:.1} FPS",
        f64::from(done) / elapsed
    );
    Ok(())
}

pub fn performance(conn: &mut Connection, ctx: &DemoContext) -> Result<()> {
    let frame = vec![Rgbw::from_rgb(255, 0, 0); usize::from(conn.led_count())];
    let end = last_index(conn);

    measure("bulk frame", ctx, || Ok(conn.bulk_update(&frame)?))?;
    measure("single pixel", ctx, || {
        Ok(conn.set_pixel(0, Rgbw::from_rgb(255, 0, 0))?)
    })?;
    measure("range", ctx, || {
        Ok(conn.set_range(0, end, Rgbw::from_rgb(255, 0, 0))?)
    })?;

    let stats = conn.stats();
    info!(
        tx_bytes = stats.tx_bytes,
        rx_bytes = stats.rx_bytes,
        commands = stats.commands,
        bulk_frames = stats.bulk_frames,
        "traffic so far"
    );
    conn.clear_all()?;
    Ok(())
}
