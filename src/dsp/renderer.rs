//! Offline renderer — plays a snapshot through the real-time engine into
//! memory or a WAV file.

use std::io::Cursor;
use std::time::Duration;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::session::{Session, SessionEvent};
use crate::snapshot::Snapshot;
use crate::transport::sixteenth_seconds;

/// Silence rendered after the last pass so releases and tails ring out.
pub const TAIL_SECONDS: f64 = 1.0;

/// Longest wait for an inline sample to decode.
const DECODE_TIMEOUT: Duration = Duration::from_secs(30);

/// Render `passes` full passes over the grid plus a one second tail.
///
/// Returns the left and right channels.
pub fn render_snapshot(
    snapshot: &Snapshot,
    sample_rate: u32,
    passes: usize,
) -> Result<(Vec<f32>, Vec<f32>), EngineError> {
    let config = EngineConfig::with_sample_rate(sample_rate as f64);
    let (mut session, mut engine) = Session::new(config)?;

    let outcome = session.load(snapshot)?;
    if outcome.decoding {
        if let Some(SessionEvent::SampleFailed { label, error }) = session.wait_for_sample(DECODE_TIMEOUT) {
            log::warn!(target: "session", "rendering without '{label}': {error}");
        }
    }

    let sr = sample_rate as f64;
    let pass_seconds = sixteenth_seconds(session.bpm()) * session.grid().steps() as f64;
    let body = (pass_seconds * passes as f64 * sr).round() as usize;
    let tail = (TAIL_SECONDS * sr).round() as usize;

    let mut left = vec![0.0f32; body + tail];
    let mut right = vec![0.0f32; body + tail];

    // Let the tempo glide from the default settle before the first tick.
    let settle = (session.config().bpm_ramp_seconds * sr).ceil() as usize + 1;
    let mut scratch_l = vec![0.0f32; settle];
    let mut scratch_r = vec![0.0f32; settle];
    engine.process(&mut scratch_l, &mut scratch_r);

    session.play()?;
    engine.process(&mut left[..body], &mut right[..body]);
    session.stop()?;
    engine.process(&mut left[body..], &mut right[body..]);
    session.close();

    Ok((left, right))
}

/// [`render_snapshot`] as a 16-bit stereo WAV file.
pub fn render_wav(snapshot: &Snapshot, sample_rate: u32, passes: usize) -> Result<Vec<u8>, EngineError> {
    let (left, right) = render_snapshot(snapshot, sample_rate, passes)?;
    encode_wav(&left, &right, sample_rate)
}

/// Interleave and quantize to 16-bit PCM.
pub fn encode_wav(left: &[f32], right: &[f32], sample_rate: u32) -> Result<Vec<u8>, EngineError> {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let wav_error = |e: hound::Error| EngineError::Storage(format!("wav: {e}"));

    let mut cursor = Cursor::new(Vec::with_capacity(44 + left.len() * 4));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).map_err(wav_error)?;
        for (&l, &r) in left.iter().zip(right) {
            writer.write_sample(to_i16(l)).map_err(wav_error)?;
            writer.write_sample(to_i16(r)).map_err(wav_error)?;
        }
        writer.finalize().map_err(wav_error)?;
    }
    Ok(cursor.into_inner())
}

fn to_i16(s: f32) -> i16 {
    (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}
