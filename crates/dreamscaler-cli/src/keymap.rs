//! LED positions of the 49 keys (C2..C6) on the strip.
//!
//! The strip runs from the high end of the keyboard to the low end, two LEDs
//! per key with a few keys one LED apart where the spacing drifts. This is a
//! measured table, not derived from key geometry.

use dreamscaler_core::pixel::Rgbw;

pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// White keys: dedicated white LED
pub const WHITE_KEY_COLOR: Rgbw = Rgbw::white(1);
/// Black keys: green
pub const BLACK_KEY_COLOR: Rgbw = Rgbw::from_rgb(0, 1, 0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Key {
    pub led: u16,
    /// Semitone within the octave, 0 = C
    pub note: u8,
    pub white: bool,
    pub octave: u8,
}

impl Key {
    const fn new(led: u16, note: u8, white: bool, octave: u8) -> Self {
        Self {
            led,
            note,
            white,
            octave,
        }
    }

    pub fn name(&self) -> String {
        format!("{}{}", NOTE_NAMES[usize::from(self.note)], self.octave)
    }

    pub fn color(&self) -> Rgbw {
        if self.white {
            WHITE_KEY_COLOR
        } else {
            BLACK_KEY_COLOR
        }
    }
}

const W: bool = true;
const B: bool = false;

pub const KEYS: [Key; 49] = [
    Key::new(1, 0, W, 6),
    // Octave 5
    Key::new(3, 11, W, 5),
    Key::new(5, 10, B, 5),
    Key::new(7, 9, W, 5),
    Key::new(9, 8, B, 5),
    Key::new(11, 7, W, 5),
    Key::new(13, 6, B, 5),
    Key::new(15, 5, W, 5),
    Key::new(17, 4, W, 5),
    Key::new(19, 3, B, 5),
    Key::new(21, 2, W, 5),
    Key::new(23, 1, B, 5),
    Key::new(25, 0, W, 5),
    // Octave 4
    Key::new(27, 11, W, 4),
    Key::new(29, 10, B, 4),
    Key::new(31, 9, W, 4),
    Key::new(33, 8, B, 4),
    Key::new(34, 7, W, 4),
    Key::new(36, 6, B, 4),
    Key::new(38, 5, W, 4),
    Key::new(40, 4, W, 4),
    Key::new(42, 3, B, 4),
    Key::new(44, 2, W, 4),
    Key::new(46, 1, B, 4),
    Key::new(48, 0, W, 4),
    // Octave 3
    Key::new(50, 11, W, 3),
    Key::new(52, 10, B, 3),
    Key::new(54, 9, W, 3),
    Key::new(56, 8, B, 3),
    Key::new(57, 7, W, 3),
    Key::new(59, 6, B, 3),
    Key::new(61, 5, W, 3),
    Key::new(63, 4, W, 3),
    Key::new(65, 3, B, 3),
    Key::new(67, 2, W, 3),
    Key::new(69, 1, B, 3),
    Key::new(71, 0, W, 3),
    // Octave 2
    Key::new(73, 11, W, 2),
    Key::new(75, 10, B, 2),
    Key::new(77, 9, W, 2),
    Key::new(79, 8, B, 2),
    Key::new(81, 7, W, 2),
    Key::new(83, 6, B, 2),
    Key::new(84, 5, W, 2),
    Key::new(86, 4, W, 2),
    Key::new(88, 3, B, 2),
    Key::new(90, 2, W, 2),
    Key::new(92, 1, B, 2),
    Key::new(94, 0, W, 2),
];

/// Keys that fit on a strip of `led_count` pixels, as (index, color)
pub fn layout(led_count: u16) -> Vec<(u16, Rgbw)> {
    KEYS.iter()
        .filter(|k| k.led < led_count)
        .map(|k| (k.led, k.color()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_counts() {
        assert_eq!(KEYS.iter().filter(|k| k.white).count(), 29);
        assert_eq!(KEYS.iter().filter(|k| !k.white).count(), 20);
    }

    #[test]
    fn test_leds_strictly_increasing() {
        assert!(KEYS.windows(2).all(|w| w[0].led < w[1].led));
    }

    #[test]
    fn test_black_keys_match_note_names() {
        for key in KEYS {
            assert_eq!(key.white, !key.name().contains('#'), "{}", key.name());
        }
    }

    #[test]
    fn test_key_names() {
        assert_eq!(KEYS[0].name(), "C6");
        assert_eq!(KEYS[24].name(), "C4");
        assert_eq!(KEYS[24].led, 48);
        assert_eq!(KEYS[48].name(), "C2");
    }

    #[test]
    fn test_layout_clipped_to_strip() {
        assert_eq!(layout(144).len(), 49);
        assert_eq!(layout(48).len(), 24);
        assert_eq!(layout(48).last(), Some(&(46, BLACK_KEY_COLOR)));
    }
}
