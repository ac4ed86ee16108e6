//! Real-time output through the default audio device.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::config::EngineConfig;
use crate::dsp::engine::AudioEngine;
use crate::error::EngineError;
use crate::session::Session;

/// A playing device stream. Dropping it closes the device.
pub struct OutputStream {
    _stream: cpal::Stream,
    sample_rate: u32,
    channels: u16,
}

impl OutputStream {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }
}

fn default_device() -> Result<(cpal::Device, cpal::SupportedStreamConfig), EngineError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| EngineError::Device("no default output device".into()))?;
    let config = device
        .default_output_config()
        .map_err(|e| EngineError::Device(format!("no default output config: {e}")))?;
    Ok((device, config))
}

/// Sample rate the default device runs at.
pub fn device_sample_rate() -> Result<u32, EngineError> {
    Ok(default_device()?.1.sample_rate().0)
}

/// Move `engine` into a callback on the default device and start it.
pub fn start_output(mut engine: AudioEngine) -> Result<OutputStream, EngineError> {
    let (device, supported) = default_device()?;
    if supported.sample_format() != cpal::SampleFormat::F32 {
        return Err(EngineError::Device(format!(
            "unsupported sample format {:?} (only f32)",
            supported.sample_format()
        )));
    }
    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels();
    let config: cpal::StreamConfig = supported.into();

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                engine.process_interleaved(data, channels as usize);
            },
            |err| log::warn!(target: "session", "output stream error: {err}"),
            None,
        )
        .map_err(|e| EngineError::Device(format!("could not build output stream: {e}")))?;
    stream
        .play()
        .map_err(|e| EngineError::Device(format!("could not start output stream: {e}")))?;

    log::info!(target: "session", "output running at {sample_rate} Hz, {channels} channels");
    Ok(OutputStream {
        _stream: stream,
        sample_rate,
        channels,
    })
}

/// A session playing through the default device, at the device's rate.
pub fn open_default(mut config: EngineConfig) -> Result<Session, EngineError> {
    config.sample_rate = device_sample_rate()? as f64;
    let (mut session, engine) = Session::new(config)?;
    session.attach_output(start_output(engine)?);
    Ok(session)
}
