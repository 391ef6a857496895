//! Standard MIDI File export.
//!
//! Notes are written to a format-1 file: a tempo track followed by one
//! piano track.

use eyre::{Result, eyre};
use midly::{
    Format, Header, MetaMessage, MidiMessage, Smf, Timing, Track, TrackEvent, TrackEventKind,
};
use pianoscribe_amt::types::NoteEvent;

/// Pulses per quarter note.
pub const PPQ: u16 = 480;

/// Fixed tempo in beats per minute.
pub const BPM: u32 = 120;

const TRACK_NAME: &str = "Piano";

/// Convert seconds to absolute ticks at the fixed tempo.
pub fn secs_to_ticks(secs: f32) -> u32 {
    let ticks_per_sec = f64::from(PPQ) * f64::from(BPM) / 60.0;
    (f64::from(secs.max(0.0)) * ticks_per_sec).round() as u32
}

/// Encode notes as SMF bytes.
///
/// An empty note list still produces a valid file with an empty piano track.
pub fn to_smf_bytes(notes: &[NoteEvent]) -> Result<Vec<u8>> {
    let smf = Smf {
        header: Header {
            format: Format::Parallel,
            timing: Timing::Metrical(PPQ.into()),
        },
        tracks: vec![tempo_track(), piano_track(notes)],
    };

    let mut bytes = Vec::new();
    smf.write(&mut bytes)
        .map_err(|e| eyre!("failed to encode midi: {e}"))?;

    Ok(bytes)
}

fn tempo_track() -> Track<'static> {
    let us_per_quarter = 60_000_000 / BPM;

    vec![
        TrackEvent {
            delta: 0u32.into(),
            kind: TrackEventKind::Meta(MetaMessage::Tempo(us_per_quarter.into())),
        },
        TrackEvent {
            delta: 0u32.into(),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        },
    ]
}

fn piano_track(notes: &[NoteEvent]) -> Track<'static> {
    // (tick, note-offs first, event)
    let mut events: Vec<(u32, u8, TrackEventKind<'static>)> = Vec::with_capacity(notes.len() * 2);

    for note in notes {
        events.push((
            secs_to_ticks(note.start),
            1,
            TrackEventKind::Midi {
                channel: 0.into(),
                message: MidiMessage::NoteOn {
                    key: note.pitch.into(),
                    vel: note.velocity.into(),
                },
            },
        ));
        events.push((
            secs_to_ticks(note.end),
            0,
            TrackEventKind::Midi {
                channel: 0.into(),
                message: MidiMessage::NoteOff {
                    key: note.pitch.into(),
                    vel: 0.into(),
                },
            },
        ));
    }

    events.sort_by_key(|&(tick, order, _)| (tick, order));

    let mut track = vec![
        TrackEvent {
            delta: 0u32.into(),
            kind: TrackEventKind::Meta(MetaMessage::TrackName(TRACK_NAME.as_bytes())),
        },
        TrackEvent {
            delta: 0u32.into(),
            kind: TrackEventKind::Midi {
                channel: 0.into(),
                message: MidiMessage::ProgramChange { program: 0.into() },
            },
        },
    ];

    let mut last_tick = 0;
    for (tick, _, kind) in events {
        track.push(TrackEvent {
            delta: (tick - last_tick).into(),
            kind,
        });
        last_tick = tick;
    }

    track.push(TrackEvent {
        delta: 0u32.into(),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });

    track
}

/// Scientific pitch name of a MIDI note (60 is C4).
pub fn note_name(pitch: u8) -> String {
    const NAMES: [&str; 12] = [
        "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
    ];
    let octave = i32::from(pitch / 12) - 1;
    format!("{}{}", NAMES[usize::from(pitch % 12)], octave)
}

fn display_note(note: &NoteEvent) -> String {
    format!(
        "{:>4} {:>8.3}s - {:>8.3}s  vel {}",
        note_name(note.pitch),
        note.start,
        note.end,
        note.velocity
    )
}

/// Display preview of notes (first and last entries) in time order.
pub fn preview_notes(notes: &[NoteEvent], head_count: usize, tail_count: usize) -> String {
    let mut sorted = notes.to_vec();
    sorted.sort_by(|a, b| a.start.total_cmp(&b.start).then(a.pitch.cmp(&b.pitch)));

    let total = sorted.len();
    let lines: Vec<String> = if total <= head_count + tail_count {
        sorted.iter().map(display_note).collect()
    } else {
        let mut out: Vec<String> = sorted[..head_count].iter().map(display_note).collect();
        out.push("...".to_string());
        out.extend(sorted[total - tail_count..].iter().map(display_note));
        out
    };

    lines.join("\n")
}
