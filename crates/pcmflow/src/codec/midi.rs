//! MIDI decoder.
//!
//! The synthetic path `midi:<midi>:soundfont:<sf2>` names both inputs. The
//! soundfont synthesizer renders stereo interleaved output at 44100 Hz in
//! blocks of at most 64 frames; the sequencer replays MIDI messages as the
//! render clock crosses their timestamps. Backward seeks restart the
//! sequencer from the head and render forward to the target.

use std::fs::File;
use std::sync::Arc;

use parking_lot::Mutex;
use rustysynth::{MidiFile, MidiFileSequencer, SoundFont, Synthesizer, SynthesizerSettings};
use tracing::debug;

use crate::decoder::{fail_load, run_worker, DecodeCallback, Decoder, ErrorCallback, LoadCallback};
use crate::error::{DecoderError, DecoderResult};

pub const MIDI_PATH_PREFIX: &str = "midi:";
pub const SOUNDFONT_PATH_SEPARATOR: &str = ":soundfont:";

const MIDI_SAMPLE_RATE: f64 = 44_100.0;
const MIDI_CHANNELS: usize = 2;
/// Render granularity; smaller is more message-accurate but costs CPU.
const RENDER_BLOCK_FRAMES: usize = 64;

pub struct MidiDecoder {
    midi_path: String,
    soundfont_path: String,
    state: Mutex<MidiState>,
}

#[derive(Default)]
struct MidiState {
    sequencer: Option<MidiFileSequencer>,
    midi: Option<Arc<MidiFile>>,
    frames: i64,
    frame_index: i64,
    /// Frames rendered since the sequencer last started from the head.
    rendered: i64,
}

/// Split `midi:<midi>:soundfont:<sf2>` into its two component paths.
pub fn split_midi_path(path: &str) -> Option<(&str, &str)> {
    let rest = path.strip_prefix(MIDI_PATH_PREFIX)?;
    let at = rest.find(SOUNDFONT_PATH_SEPARATOR)?;
    Some((&rest[..at], &rest[at + SOUNDFONT_PATH_SEPARATOR.len()..]))
}

impl MidiDecoder {
    pub fn new(path: &str) -> Option<Self> {
        let (midi_path, soundfont_path) = split_midi_path(path)?;
        Some(Self {
            midi_path: midi_path.to_string(),
            soundfont_path: soundfont_path.to_string(),
            state: Mutex::new(MidiState::default()),
        })
    }

    fn open(&self) -> DecoderResult<()> {
        let mut midi_file = File::open(&self.midi_path)
            .map_err(|e| DecoderError::LoadMidiFailure(e.to_string()))?;
        let midi = Arc::new(
            MidiFile::new(&mut midi_file).map_err(|e| DecoderError::LoadMidiFailure(e.to_string()))?,
        );

        let mut sf_file = File::open(&self.soundfont_path)
            .map_err(|e| DecoderError::LoadSoundFontFailure(e.to_string()))?;
        let sound_font = Arc::new(
            SoundFont::new(&mut sf_file)
                .map_err(|e| DecoderError::LoadSoundFontFailure(e.to_string()))?,
        );

        let settings = SynthesizerSettings::new(MIDI_SAMPLE_RATE as i32);
        let synthesizer = Synthesizer::new(&sound_font, &settings)
            .map_err(|e| DecoderError::LoadSoundFontFailure(e.to_string()))?;
        let mut sequencer = MidiFileSequencer::new(synthesizer);
        sequencer.play(&midi, false);

        let frames = (midi.get_length() * MIDI_SAMPLE_RATE) as i64;
        debug!(
            midi = %self.midi_path,
            soundfont = %self.soundfont_path,
            frames,
            "midi ready"
        );

        let mut state = self.state.lock();
        state.sequencer = Some(sequencer);
        state.midi = Some(midi);
        state.frames = frames;
        state.frame_index = 0;
        state.rendered = 0;
        Ok(())
    }

    /// Render `frames` frames into an interleaved stereo buffer.
    fn render_interleaved(state: &mut MidiState, frames: usize) -> Vec<f32> {
        let Some(sequencer) = state.sequencer.as_mut() else {
            return Vec::new();
        };
        let mut out = vec![0f32; frames * MIDI_CHANNELS];
        let mut left = vec![0f32; RENDER_BLOCK_FRAMES];
        let mut right = vec![0f32; RENDER_BLOCK_FRAMES];
        let mut done = 0usize;
        while done < frames {
            let block = RENDER_BLOCK_FRAMES.min(frames - done);
            sequencer.render(&mut left[..block], &mut right[..block]);
            for i in 0..block {
                out[(done + i) * 2] = left[i];
                out[(done + i) * 2 + 1] = right[i];
            }
            done += block;
        }
        state.rendered += frames as i64;
        out
    }

    /// Restart the sequencer from the head of the MIDI stream.
    fn restart(state: &mut MidiState) {
        let midi = state.midi.clone();
        if let (Some(sequencer), Some(midi)) = (state.sequencer.as_mut(), midi) {
            sequencer.play(&midi, false);
            state.rendered = 0;
        }
    }
}

impl Decoder for MidiDecoder {
    fn load(self: Arc<Self>, on_error: ErrorCallback, on_done: LoadCallback) {
        let strong_this = self;
        run_worker(false, move || match strong_this.open() {
            Ok(()) => on_done(true),
            Err(e) => fail_load(&on_error, on_done, strong_this.name(), e.code()),
        });
    }

    fn sample_rate(&self) -> f64 {
        MIDI_SAMPLE_RATE
    }

    fn channels(&self) -> usize {
        MIDI_CHANNELS
    }

    fn frames(&self) -> i64 {
        self.state.lock().frames
    }

    fn current_frame_index(&self) -> i64 {
        self.state.lock().frame_index
    }

    fn seek(&self, frame_index: i64) {
        let mut state = self.state.lock();
        if frame_index == state.frame_index {
            return;
        }
        // The synthesizer renders strictly forward; going backwards means
        // starting over from the head.
        if frame_index < state.rendered {
            Self::restart(&mut state);
        }
        let gap = frame_index - state.rendered;
        if gap > 0 {
            let _ = Self::render_interleaved(&mut state, gap as usize);
        }
        state.frame_index = frame_index;
    }

    fn decode(self: Arc<Self>, frames: i64, cb: DecodeCallback, synchronous: bool) {
        let strong_this = self;
        run_worker(synchronous, move || {
            let mut state = strong_this.state.lock();
            let frame_index = state.frame_index;
            if frames <= 0 || state.sequencer.is_none() || frame_index >= state.frames {
                drop(state);
                cb(frame_index, 0, &[]);
                return;
            }
            let wanted = frames.min(state.frames - frame_index).max(0);
            let out = Self::render_interleaved(&mut state, wanted as usize);
            let read_frames = (out.len() / MIDI_CHANNELS) as i64;
            state.frame_index = frame_index + read_frames;
            drop(state);

            cb(frame_index, read_frames, &out);
        });
    }

    fn eof(&self) -> bool {
        let state = self.state.lock();
        state.frame_index >= state.frames
    }

    fn path(&self) -> String {
        self.midi_path.clone()
    }

    fn name(&self) -> &'static str {
        "com.nativeformat.decoder.midi"
    }

    fn flush(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn midi_paths_split_on_the_literal_separators() {
        let (midi, sf2) = split_midi_path("midi:/a/b.mid:soundfont:/c/d.sf2").unwrap();
        assert_eq!(midi, "/a/b.mid");
        assert_eq!(sf2, "/c/d.sf2");

        assert!(split_midi_path("/a/b.mid").is_none());
        assert!(split_midi_path("midi:/a/b.mid").is_none());
    }
}
