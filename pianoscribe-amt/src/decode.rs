//! Piano-roll to note event decoding.

use crate::error::{ConfigError, Error, Result};
use crate::types::{LOWEST_PITCH, NUM_KEYS, NoteEvent, PianoRoll};

/// Per-key decoding parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecoderConfig {
    /// Candidates shorter than this many frames are dropped as noise
    pub min_note_frames: usize,
    /// Fixed velocity of every emitted note
    pub velocity: u8,
    /// MIDI pitch of key 0
    pub lowest_pitch: u8,
}

/// Highest valid MIDI note number.
const MAX_PITCH: usize = 127;

impl DecoderConfig {
    pub const PIANO: Self = Self {
        min_note_frames: 5,
        velocity: 80,
        lowest_pitch: LOWEST_PITCH,
    };
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self::PIANO
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum KeyState {
    Idle,
    Holding { start: usize },
}

impl DecoderConfig {
    /// Decode binarized onset/sustain rolls into notes.
    ///
    /// Each key runs an `Idle`/`Holding` state machine: an onset while idle
    /// starts a note, a frame without sustain while holding ends it. Onsets
    /// while already holding are ignored, so repeated strikes of a held key
    /// merge into one note. A note still held after the last frame closes
    /// one hop past the last timestamp.
    ///
    /// Notes are emitted key by key, each key in time order.
    pub fn decode(
        &self,
        roll: &PianoRoll,
        timestamps: &[f32],
        hop_secs: f32,
    ) -> Result<Vec<NoteEvent>> {
        if roll.num_frames() != timestamps.len() {
            return Err(Error::ShapeMismatch {
                what: "piano roll frames vs timestamps",
                expected: roll.num_frames(),
                got: timestamps.len(),
            });
        }
        if roll.num_keys() > NUM_KEYS {
            return Err(Error::ShapeMismatch {
                what: "piano roll keys",
                expected: NUM_KEYS,
                got: roll.num_keys(),
            });
        }

        let highest = usize::from(self.lowest_pitch) + roll.num_keys().saturating_sub(1);
        if highest > MAX_PITCH {
            return Err(ConfigError::InvalidPitchRange {
                lowest: self.lowest_pitch,
                highest,
            }
            .into());
        }

        let num_frames = roll.num_frames();
        let mut notes = Vec::new();

        for (k, (onsets, sustain)) in roll
            .onsets
            .columns()
            .into_iter()
            .zip(roll.sustain.columns())
            .enumerate()
        {
            // bounded by MAX_PITCH above
            let pitch = self.lowest_pitch + k as u8;
            let mut state = KeyState::Idle;

            for t in 0..num_frames {
                if onsets[t] && state == KeyState::Idle {
                    state = KeyState::Holding { start: t };
                }

                if let KeyState::Holding { start } = state
                    && !sustain[t]
                {
                    self.emit(&mut notes, pitch, start, t, timestamps[start], timestamps[t]);
                    state = KeyState::Idle;
                }
            }

            if let (KeyState::Holding { start }, Some(&last)) = (state, timestamps.last()) {
                self.emit(&mut notes, pitch, start, num_frames, timestamps[start], last + hop_secs);
            }
        }

        tracing::debug!(frames = num_frames, notes = notes.len(), "decoded notes");

        Ok(notes)
    }

    fn emit(
        &self,
        notes: &mut Vec<NoteEvent>,
        pitch: u8,
        start_frame: usize,
        end_frame: usize,
        start: f32,
        end: f32,
    ) {
        if end_frame - start_frame < self.min_note_frames {
            tracing::trace!(pitch, start_frame, end_frame, "dropped short note");
            return;
        }
        // a malformed timestamp axis must not leak zero-length notes
        if end <= start {
            return;
        }
        notes.push(NoteEvent::new(pitch, start, end, self.velocity));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    const HOP: f32 = 512.0 / 22050.0;

    fn timestamps(frames: usize) -> Vec<f32> {
        (0..frames).map(|t| t as f32 * HOP).collect()
    }

    /// Build a roll with the given `(key, frame)` onsets and
    /// `(key, start..end)` sustain spans.
    fn roll(
        frames: usize,
        onsets: &[(usize, usize)],
        sustain: &[(usize, std::ops::Range<usize>)],
    ) -> PianoRoll {
        let mut on = Array2::from_elem((frames, NUM_KEYS), false);
        let mut held = Array2::from_elem((frames, NUM_KEYS), false);
        for &(k, t) in onsets {
            on[[t, k]] = true;
        }
        for (k, span) in sustain {
            for t in span.clone() {
                held[[t, *k]] = true;
            }
        }
        PianoRoll::new(on, held).unwrap()
    }

    fn decode(roll: &PianoRoll) -> Vec<NoteEvent> {
        DecoderConfig::PIANO
            .decode(roll, &timestamps(roll.num_frames()), HOP)
            .unwrap()
    }

    #[test]
    fn emits_note_between_onset_and_release() {
        let roll = roll(40, &[(39, 10)], &[(39, 10..20)]);

        let notes = decode(&roll);

        assert_eq!(notes.len(), 1);
        let note = notes[0];
        assert_eq!(note.pitch, 60);
        assert_eq!(note.velocity, 80);
        assert!((note.start - 10.0 * HOP).abs() < 1e-6);
        assert!((note.end - 20.0 * HOP).abs() < 1e-6);
    }

    #[test]
    fn drops_notes_shorter_than_minimum() {
        let short = roll(30, &[(0, 5)], &[(0, 5..9)]);
        let exact = roll(30, &[(0, 5)], &[(0, 5..10)]);

        assert!(decode(&short).is_empty());

        let notes = decode(&exact);
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].pitch, 21);
    }

    #[test]
    fn ignores_onsets_while_holding() {
        let roll = roll(40, &[(87, 2), (87, 8), (87, 14)], &[(87, 2..30)]);

        let notes = decode(&roll);

        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].pitch, 108);
        assert!((notes[0].start - 2.0 * HOP).abs() < 1e-6);
        assert!((notes[0].end - 30.0 * HOP).abs() < 1e-6);
    }

    #[test]
    fn closes_held_note_one_hop_after_last_frame() {
        let roll = roll(20, &[(40, 12)], &[(40, 12..20)]);

        let notes = decode(&roll);

        assert_eq!(notes.len(), 1);
        assert!((notes[0].end - (19.0 * HOP + HOP)).abs() < 1e-6);
    }

    #[test]
    fn final_closure_applies_minimum_duration() {
        let roll = roll(20, &[(40, 16)], &[(40, 16..20)]);

        assert!(decode(&roll).is_empty());
    }

    #[test]
    fn onset_without_sustain_is_discarded() {
        let roll = roll(20, &[(3, 4)], &[]);

        assert!(decode(&roll).is_empty());
    }

    #[test]
    fn sustain_without_onset_is_ignored() {
        let roll = roll(20, &[], &[(3, 0..20)]);

        assert!(decode(&roll).is_empty());
    }

    #[test]
    fn retriggers_after_release() {
        let roll = roll(40, &[(20, 0), (20, 20)], &[(20, 0..10), (20, 20..35)]);

        let notes = decode(&roll);

        assert_eq!(notes.len(), 2);
        assert!(notes[0].end <= notes[1].start);
    }

    #[test]
    fn emits_notes_grouped_by_key() {
        let roll = roll(40, &[(50, 0), (10, 20)], &[(50, 0..10), (10, 20..30)]);

        let pitches: Vec<u8> = decode(&roll).iter().map(|n| n.pitch).collect();

        assert_eq!(pitches, vec![31, 71]);
    }

    #[test]
    fn every_note_has_positive_duration() {
        let roll = roll(
            60,
            &[(1, 0), (2, 3), (2, 40), (3, 59)],
            &[(1, 0..60), (2, 3..25), (2, 40..60), (3, 59..60)],
        );

        let notes = decode(&roll);

        assert!(!notes.is_empty());
        assert!(notes.iter().all(|n| n.end > n.start));
    }

    #[test]
    fn rejects_mismatched_timestamps() {
        let roll = roll(10, &[], &[]);

        let result = DecoderConfig::PIANO.decode(&roll, &timestamps(9), HOP);

        assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn honors_custom_config() {
        let config = DecoderConfig {
            min_note_frames: 1,
            velocity: 100,
            lowest_pitch: 0,
        };
        let roll = roll(10, &[(7, 3)], &[(7, 3..4)]);

        let notes = config.decode(&roll, &timestamps(10), HOP).unwrap();

        assert_eq!(notes, vec![NoteEvent::new(7, 3.0 * HOP, 4.0 * HOP, 100)]);
    }

    #[test]
    fn rejects_pitches_above_midi_range() {
        let config = DecoderConfig {
            lowest_pitch: 41,
            ..DecoderConfig::PIANO
        };
        let roll = roll(10, &[(87, 2)], &[(87, 2..9)]);

        let result = config.decode(&roll, &timestamps(10), HOP);

        assert!(matches!(
            result,
            Err(Error::Config(ConfigError::InvalidPitchRange {
                lowest: 41,
                highest: 128
            }))
        ));
    }

    #[test]
    fn accepts_range_ending_at_highest_pitch() {
        let config = DecoderConfig {
            lowest_pitch: 40,
            min_note_frames: 1,
            ..DecoderConfig::PIANO
        };
        let roll = roll(10, &[(87, 2)], &[(87, 2..9)]);

        let notes = config.decode(&roll, &timestamps(10), HOP).unwrap();

        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].pitch, 127);
    }
}
