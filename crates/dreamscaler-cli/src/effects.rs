//! Animated effects
//!
//! Each effect renders whole frames into a pixel slice; [`animate`] pushes
//! them to a [`PixelSink`] until the time is up or the program is asked to
//! stop.

use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use dreamscaler_core::pixel::{hsv_to_rgb, Rgbw};
use dreamscaler_core::protocol::ProtocolError;
use dreamscaler_core::sink::PixelSink;
use rand::Rng;

/// Run `render` for up to `duration`, one frame every `frame_delay`.
///
/// Checks `running` before every frame. A failed frame aborts the animation
/// and is returned; nothing is retried. Returns the number of frames shown.
pub fn animate<S: PixelSink + ?Sized>(
    sink: &mut S,
    running: &AtomicBool,
    duration: Duration,
    frame_delay: Duration,
    mut render: impl FnMut(u64, &mut [Rgbw]),
) -> Result<u64, ProtocolError> {
    let mut frame = vec![Rgbw::OFF; sink.pixel_count()];
    let start = Instant::now();
    let mut frames = 0u64;

    while running.load(Ordering::SeqCst) && start.elapsed() < duration {
        frame.fill(Rgbw::OFF);
        render(frames, &mut frame);
        sink.show_frame(&frame)?;
        frames += 1;
        std::thread::sleep(frame_delay);
    }

    tracing::debug!(frames, elapsed = ?start.elapsed(), "animation finished");
    Ok(frames)
}

/// Hue sweep along the strip, drifting 3 degrees per frame
pub fn rainbow(frame: u64, pixels: &mut [Rgbw]) {
    let n = pixels.len().max(1) as f32;
    let offset = (frame * 3 % 360) as f32;
    for (i, pixel) in pixels.iter_mut().enumerate() {
        let hue = i as f32 * 360.0 / n + offset;
        let (r, g, b) = hsv_to_rgb(hue, 1.0, 0.3);
        *pixel = Rgbw::from_rgb(r, g, b);
    }
}

const TAIL_LENGTH: usize = 10;

/// Red dot bouncing end to end with a fading tail
pub fn knight_rider(frame: u64, pixels: &mut [Rgbw]) {
    let n = pixels.len();
    if n < 2 {
        pixels.fill(Rgbw::from_rgb(255, 0, 0));
        return;
    }

    let period = 2 * (n as u64 - 1);
    let phase = (frame % period) as usize;
    let (pos, forward) = if phase < n - 1 {
        (phase, true)
    } else {
        (2 * (n - 1) - phase, false)
    };

    pixels[pos] = Rgbw::from_rgb(255, 0, 0);
    for i in 1..TAIL_LENGTH {
        let tail = if forward {
            pos.checked_sub(i)
        } else {
            Some(pos + i).filter(|&t| t < n)
        };
        if let Some(t) = tail {
            let level = 255 - (i * 255 / TAIL_LENGTH) as u8;
            pixels[t] = Rgbw::from_rgb(level, 0, 0);
        }
    }
}

/// Flickering orange
pub fn fire(rng: &mut impl Rng, pixels: &mut [Rgbw]) {
    for pixel in pixels.iter_mut() {
        let intensity: u8 = rng.gen_range(100..=255);
        *pixel = Rgbw::from_rgb(intensity, intensity / 2, 0);
    }
}

const SPARKLE_BASE: Rgbw = Rgbw::new(30, 20, 0, 10);
const SPARKLE_FLASH: Rgbw = Rgbw::new(255, 255, 200, 255);
const SPARKLES: usize = 10;

/// Warm background with random bright flashes
pub fn sparkle(rng: &mut impl Rng, pixels: &mut [Rgbw]) {
    pixels.fill(SPARKLE_BASE);
    if pixels.is_empty() {
        return;
    }
    for _ in 0..SPARKLES {
        let pos = rng.gen_range(0..pixels.len());
        pixels[pos] = SPARKLE_FLASH;
    }
}

/// One blue sine period along the strip, travelling
pub fn wave(frame: u64, pixels: &mut [Rgbw]) {
    let n = pixels.len().max(1) as f32;
    for (i, pixel) in pixels.iter_mut().enumerate() {
        let phase = i as f32 / n * TAU + frame as f32 * 0.1;
        let level = ((phase.sin() + 1.0) * 127.5) as u8;
        *pixel = Rgbw::from_rgb(0, 0, level);
    }
}

/// Whole strip in one color, hue advancing 2 degrees per frame
pub fn color_cycle(frame: u64, pixels: &mut [Rgbw]) {
    let hue = (frame * 2 % 360) as f32;
    let (r, g, b) = hsv_to_rgb(hue, 1.0, 0.5);
    pixels.fill(Rgbw::from_rgb(r, g, b));
}

const CHASE_COLORS: [Rgbw; 3] = [
    Rgbw::from_rgb(255, 0, 0),
    Rgbw::from_rgb(0, 255, 0),
    Rgbw::from_rgb(0, 0, 255),
];

/// Every third pixel lit, shifting by one each frame
pub fn theater_chase(frame: u64, pixels: &mut [Rgbw]) {
    let offset = (frame % 3) as usize;
    for i in (offset..pixels.len()).step_by(3) {
        pixels[i] = CHASE_COLORS[(i / 3) % CHASE_COLORS.len()];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dreamscaler_core::sink::FrameBuffer;
    use pretty_assertions::assert_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn render(f: fn(u64, &mut [Rgbw]), frame: u64, n: usize) -> Vec<Rgbw> {
        let mut pixels = vec![Rgbw::OFF; n];
        f(frame, &mut pixels);
        pixels
    }

    #[test]
    fn test_knight_rider_bounces() {
        let n = 20;
        let head = |frame| {
            render(knight_rider, frame, n)
                .iter()
                .position(|p| p.r == 255)
                .unwrap()
        };
        assert_eq!(head(0), 0);
        assert_eq!(head(19), 19);
        assert_eq!(head(20), 18);
        assert_eq!(head(38), 0);
    }

    #[test]
    fn test_knight_rider_tail_behind_head() {
        let pixels = render(knight_rider, 15, 20);
        assert_eq!(pixels[15], Rgbw::from_rgb(255, 0, 0));
        assert_eq!(pixels[14].r, 255 - 25);
        assert_eq!(pixels[16], Rgbw::OFF);
    }

    #[test]
    fn test_theater_chase_every_third() {
        let pixels = render(theater_chase, 1, 9);
        let lit: Vec<usize> = (0..9).filter(|&i| !pixels[i].is_off()).collect();
        assert_eq!(lit, vec![1, 4, 7]);
    }

    #[test]
    fn test_color_cycle_uniform() {
        let pixels = render(color_cycle, 30, 12);
        assert!(pixels.iter().all(|&p| p == pixels[0]));
        assert_eq!(pixels[0].w, 0);
    }

    #[test]
    fn test_wave_blue_only() {
        let pixels = render(wave, 7, 144);
        assert!(pixels.iter().all(|p| p.r == 0 && p.g == 0 && p.w == 0));
        assert!(pixels.iter().any(|p| p.b > 200));
    }

    #[test]
    fn test_fire_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut pixels = vec![Rgbw::OFF; 144];
        fire(&mut rng, &mut pixels);
        assert!(pixels.iter().all(|p| p.r >= 100 && p.g == p.r / 2 && p.b == 0));
    }

    #[test]
    fn test_sparkle_flashes() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut pixels = vec![Rgbw::OFF; 144];
        sparkle(&mut rng, &mut pixels);
        let flashes = pixels.iter().filter(|&&p| p == SPARKLE_FLASH).count();
        assert!((1..=SPARKLES).contains(&flashes));
        assert!(pixels.iter().all(|&p| p == SPARKLE_FLASH || p == SPARKLE_BASE));
    }

    #[test]
    fn test_animate_stops_when_not_running() {
        let mut sink = FrameBuffer::new(8);
        let running = AtomicBool::new(false);
        let frames = animate(
            &mut sink,
            &running,
            Duration::from_secs(10),
            Duration::ZERO,
            rainbow,
        )
        .unwrap();
        assert_eq!(frames, 0);
        assert_eq!(sink.frames_shown(), 0);
    }

    #[test]
    fn test_animate_pushes_frames() {
        let mut sink = FrameBuffer::new(8);
        let running = AtomicBool::new(true);
        let frames = animate(
            &mut sink,
            &running,
            Duration::from_millis(20),
            Duration::from_millis(1),
            theater_chase,
        )
        .unwrap();
        assert!(frames > 0);
        assert_eq!(sink.frames_shown(), frames);
    }
}
