//! Equal-temperament note math
//!
//! Note indices follow MIDI numbering: A4 = 69 at the reference
//! frequency. Pitch classes are 0..12 with C = 0.

/// Reference tuning frequency (A4)
pub const REFERENCE_FREQ: f32 = 440.0;

/// Note index of the reference frequency
pub const REFERENCE_NOTE: i32 = 69;

/// Pitch-class names, C first
pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Nearest note index for a frequency
pub fn note_index_for(frequency_hz: f32) -> i32 {
    (12.0 * (frequency_hz / REFERENCE_FREQ).log2()).round() as i32 + REFERENCE_NOTE
}

/// Center frequency of a note index
pub fn freq_of(note_index: i32) -> f32 {
    REFERENCE_FREQ * 2.0_f32.powf((note_index - REFERENCE_NOTE) as f32 / 12.0)
}

/// Signed deviation of a frequency from a note's center, in cents
pub fn cents_from(frequency_hz: f32, note_index: i32) -> f32 {
    1200.0 * (frequency_hz / freq_of(note_index)).log2()
}

/// Pitch class (0..12, C = 0) of a note index
pub fn pitch_class(note_index: i32) -> usize {
    note_index.rem_euclid(12) as usize
}

/// Display name such as "A4" or "F#3"
pub fn note_name(note_index: i32) -> String {
    let octave = note_index.div_euclid(12) - 1;
    format!("{}{}", NOTE_NAMES[pitch_class(note_index)], octave)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_pitch() {
        assert_eq!(note_index_for(440.0), 69);
        assert_eq!(note_name(69), "A4");
        assert!((freq_of(69) - 440.0).abs() < 1e-3);
    }

    #[test]
    fn test_common_notes() {
        // Middle C
        assert_eq!(note_index_for(261.63), 60);
        assert_eq!(note_name(60), "C4");
        // Low E on a guitar
        assert_eq!(note_index_for(82.41), 40);
        assert_eq!(note_name(40), "E2");
    }

    #[test]
    fn test_cents_sign_and_magnitude() {
        // 445 Hz sits sharp of A4 by about 20 cents
        let c = cents_from(445.0, 69);
        assert!(c > 15.0 && c < 25.0);
        assert!(cents_from(435.0, 69) < 0.0);
        assert!(cents_from(440.0, 69).abs() < 1e-3);
    }

    #[test]
    fn test_pitch_class_wraps_negative() {
        assert_eq!(pitch_class(0), 0);
        assert_eq!(pitch_class(69), 9);
        assert_eq!(pitch_class(-1), 11);
    }
}
