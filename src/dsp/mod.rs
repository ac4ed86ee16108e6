//! DSP — everything that runs on the audio thread.
//!
//! Stage processors (filter, eq, compressor, chorus, delay, reverb,
//! distortion, bitcrusher, meter) are assembled into an
//! [`ActiveChain`](stage::ActiveChain); sources (oscillator, envelope,
//! voice, sampler) feed the input [`bus`]; [`engine`] ties them to the
//! sequencer, and [`renderer`] drives the same engine offline.

pub mod bitcrusher;
pub mod bus;
pub mod chorus;
pub mod compressor;
pub mod delay;
pub mod distortion;
pub mod engine;
pub mod envelope;
pub mod eq;
pub mod filter;
pub mod meter;
pub mod oscillator;
pub mod renderer;
pub mod reverb;
pub mod sampler;
pub mod stage;
pub mod voice;
