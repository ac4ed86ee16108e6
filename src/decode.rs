//! Sample decoding and the background loader.
//!
//! Bytes are sniffed rather than trusted by extension: a RIFF/WAVE header
//! goes to `hound`, anything that looks like MPEG audio goes to `minimp3`.
//! Every format is mixed down to a mono [`SampleBuffer`].

use std::io::Cursor;
#[cfg(not(target_arch = "wasm32"))]
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};
use serde::{Deserialize, Serialize};

use crate::dsp::sampler::SampleBuffer;
use crate::error::EngineError;

/// Container formats the decoder understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    Wav,
    Mp3,
}

impl SampleFormat {
    pub fn codec(self) -> &'static str {
        match self {
            SampleFormat::Wav => "wav",
            SampleFormat::Mp3 => "mp3",
        }
    }
}

/// Identify the container from its first bytes.
pub fn sniff(bytes: &[u8]) -> Option<SampleFormat> {
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE" {
        return Some(SampleFormat::Wav);
    }
    if bytes.starts_with(b"ID3") {
        return Some(SampleFormat::Mp3);
    }
    // MPEG frame sync: 11 set bits.
    if bytes.len() >= 2 && bytes[0] == 0xFF && (bytes[1] & 0xE0) == 0xE0 {
        return Some(SampleFormat::Mp3);
    }
    None
}

/// Decode a complete audio file held in memory.
pub fn decode_sample(bytes: &[u8]) -> Result<SampleBuffer, EngineError> {
    let buffer = match sniff(bytes) {
        Some(SampleFormat::Wav) => decode_wav(bytes)?,
        Some(SampleFormat::Mp3) => decode_mp3(bytes)?,
        None => return Err(EngineError::Decode("unrecognized audio format".into())),
    };
    if buffer.is_empty() {
        return Err(EngineError::Decode("sample contains no audio frames".into()));
    }
    Ok(buffer)
}

fn decode_wav(bytes: &[u8]) -> Result<SampleBuffer, EngineError> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes)).map_err(|e| EngineError::Decode(format!("wav: {e}")))?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| EngineError::Decode(format!("wav: {e}")))?,
        hound::SampleFormat::Int => {
            let max = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|x| x as f32 / max))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| EngineError::Decode(format!("wav: {e}")))?
        }
    };

    Ok(SampleBuffer::from_interleaved(&samples, spec.channels as usize, spec.sample_rate))
}

fn decode_mp3(bytes: &[u8]) -> Result<SampleBuffer, EngineError> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(bytes));
    let mut mono: Vec<f32> = Vec::new();
    let mut sample_rate = 0u32;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if sample_rate == 0 {
                    sample_rate = frame.sample_rate.max(0) as u32;
                }
                let channels = frame.channels.max(1);
                mono.extend(
                    frame
                        .data
                        .chunks_exact(channels)
                        .map(|f| f.iter().map(|&s| s as f32 / 32768.0).sum::<f32>() / channels as f32),
                );
            }
            Err(minimp3::Error::Eof) => break,
            Err(minimp3::Error::SkippedData) => continue,
            Err(e) => return Err(EngineError::Decode(format!("mp3: {e}"))),
        }
    }

    if sample_rate == 0 {
        return Err(EngineError::Decode("mp3: no decodable frames".into()));
    }
    Ok(SampleBuffer::new(mono, sample_rate))
}

// ── Background loader ───────────────────────────────────────

/// Result of one background decode.
#[derive(Debug)]
pub struct Decoded {
    pub generation: u64,
    pub label: String,
    pub result: Result<SampleBuffer, EngineError>,
}

/// Decodes on a worker thread and hands results back to the control path.
///
/// Each [`load`](Self::load) starts a new generation; results from older
/// generations are discarded when polled.
#[derive(Debug)]
pub struct SampleLoader {
    tx: Sender<Decoded>,
    rx: Receiver<Decoded>,
    generation: u64,
    pending: bool,
}

impl Default for SampleLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleLoader {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        SampleLoader {
            tx,
            rx,
            generation: 0,
            pending: false,
        }
    }

    /// Start decoding `bytes`, superseding any decode still in flight.
    pub fn load(&mut self, label: impl Into<String>, bytes: Vec<u8>) -> Result<u64, EngineError> {
        self.generation += 1;
        let generation = self.generation;
        let label = label.into();
        let tx = self.tx.clone();

        log::info!(target: "decode", "decoding '{label}' ({} bytes)", bytes.len());

        // No threads on wasm32: decode inline, the result still arrives via poll.
        #[cfg(target_arch = "wasm32")]
        {
            let result = decode_sample(&bytes);
            let _ = tx.send(Decoded { generation, label, result });
        }
        #[cfg(not(target_arch = "wasm32"))]
        thread::Builder::new()
            .name("sample-decode".into())
            .spawn(move || {
                let result = decode_sample(&bytes);
                // The loader may be gone by the time we finish.
                let _ = tx.send(Decoded { generation, label, result });
            })
            .map_err(|e| EngineError::Decode(format!("could not start decoder thread: {e}")))?;

        self.pending = true;
        Ok(generation)
    }

    /// Forget whatever is in flight.
    pub fn cancel(&mut self) {
        self.generation += 1;
        self.pending = false;
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// The latest current-generation result, if one has arrived.
    pub fn poll(&mut self) -> Option<Decoded> {
        let mut latest = None;
        while let Ok(decoded) = self.rx.try_recv() {
            if let Some(d) = self.accept(decoded) {
                latest = Some(d);
            }
        }
        latest
    }

    /// Block up to `timeout` for the current generation's result.
    pub fn wait(&mut self, timeout: Duration) -> Option<Decoded> {
        if !self.pending {
            return None;
        }
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(decoded) => {
                    if let Some(d) = self.accept(decoded) {
                        return Some(d);
                    }
                }
                Err(_) => return None,
            }
        }
    }

    fn accept(&mut self, decoded: Decoded) -> Option<Decoded> {
        if decoded.generation != self.generation {
            log::debug!(target: "decode", "discarding stale decode of '{}'", decoded.label);
            return None;
        }
        self.pending = false;
        Some(decoded)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A mono 16-bit WAV of `frames` frames of a 440 Hz tone.
    pub(crate) fn tone_wav(frames: usize, sample_rate: u32, channels: u16) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for i in 0..frames {
                let s = (2.0 * std::f32::consts::PI * 440.0 * i as f32 / sample_rate as f32).sin();
                for _ in 0..channels {
                    writer.write_sample((s * 16000.0) as i16).unwrap();
                }
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn sniffs_containers() {
        assert_eq!(sniff(&tone_wav(10, 44100, 1)), Some(SampleFormat::Wav));
        assert_eq!(sniff(b"ID3\x04\x00rest"), Some(SampleFormat::Mp3));
        assert_eq!(sniff(&[0xFF, 0xFB, 0x90, 0x00]), Some(SampleFormat::Mp3));
        assert_eq!(sniff(b"OggS"), None);
    }

    #[test]
    fn decodes_stereo_wav_to_mono() {
        let buffer = decode_sample(&tone_wav(2205, 22050, 2)).unwrap();
        assert_eq!(buffer.sample_rate, 22050);
        assert_eq!(buffer.len(), 2205);
        let peak = buffer.data.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!((peak - 16000.0 / 32768.0).abs() < 0.01, "got {peak}");
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let err = decode_sample(b"definitely not audio").unwrap_err();
        assert!(matches!(err, EngineError::Decode(_)));
        // Right magic, broken body.
        let err = decode_sample(b"RIFF\x00\x00\x00\x00WAVEjunk").unwrap_err();
        assert!(matches!(err, EngineError::Decode(_)));
    }

    #[test]
    fn loader_delivers_result() {
        let mut loader = SampleLoader::new();
        loader.load("tone.wav", tone_wav(100, 44100, 1)).unwrap();
        assert!(loader.is_pending());
        let decoded = loader.wait(Duration::from_secs(5)).expect("decode result");
        assert_eq!(decoded.label, "tone.wav");
        assert_eq!(decoded.result.unwrap().len(), 100);
        assert!(!loader.is_pending());
    }

    #[test]
    fn newer_load_supersedes_older() {
        let mut loader = SampleLoader::new();
        loader.load("first.wav", tone_wav(100, 44100, 1)).unwrap();
        loader.load("second.wav", tone_wav(200, 44100, 1)).unwrap();
        let decoded = loader.wait(Duration::from_secs(5)).expect("decode result");
        assert_eq!(decoded.label, "second.wav");
        // The first result, whenever it lands, is dropped.
        std::thread::sleep(Duration::from_millis(50));
        assert!(loader.poll().is_none());
    }
}
