//! End-to-end runs through the public API: a session driving the engine
//! half the way an audio callback would.

use arrayvec::ArrayVec;

use pianoroll_core::grid::ROWS;
use pianoroll_core::transport::{NoteTrigger, Pattern, Sequencer, TRIGGER_CAPACITY, TransportStatus};
use pianoroll_core::{
    AudioEngine, EffectKind, EngineConfig, EngineError, Grid, MemoryStore, Session, Snapshot, SnapshotStore,
    StepCount,
};

fn session() -> (Session, AudioEngine) {
    Session::new(EngineConfig::with_sample_rate(22050.0)).unwrap()
}

fn pump(engine: &mut AudioEngine, frames: usize) -> (Vec<f32>, Vec<f32>) {
    let mut left = vec![0.0; frames];
    let mut right = vec![0.0; frames];
    engine.process(&mut left, &mut right);
    (left, right)
}

fn canonical(subset: u16) -> Vec<EffectKind> {
    EffectKind::ALL
        .into_iter()
        .filter(|k| subset & (1 << k.index()) != 0)
        .collect()
}

#[test]
fn every_enabled_subset_yields_canonical_order() {
    let (mut session, mut engine) = session();
    for subset in 0u16..512 {
        // Enable in reverse to show enable order does not matter.
        for kind in EffectKind::ALL.into_iter().rev() {
            session.set_enabled(kind, subset & (1 << kind.index()) != 0).unwrap();
        }
        let expected = canonical(subset);
        assert_eq!(session.active_chain(), expected.as_slice(), "subset {subset:#011b}");
        assert!(session.wiring().is_series());

        // Same set again: nothing changes and nothing rebuilds.
        let count = session.rebuild_count();
        for kind in EffectKind::ALL {
            session.set_enabled(kind, subset & (1 << kind.index()) != 0).unwrap();
        }
        assert_eq!(session.rebuild_count(), count);
        assert_eq!(session.active_chain(), expected.as_slice());

        // Let the engine take the installs so the queues never fill.
        pump(&mut engine, 64);
        session.poll();
    }
}

#[test]
fn diagonal_grid_fires_in_step_order() {
    let mut grid = Grid::new(StepCount::Sixteen);
    for step in 0..16 {
        grid.set(step % ROWS, step, true).unwrap();
    }
    let pattern = Pattern {
        grid,
        octave: 5,
        pitch: 0,
    };

    let sample_rate = 44100.0;
    let status = TransportStatus::default();
    let mut sequencer = Sequencer::new(sample_rate, 120.0, 0.05);
    sequencer.start(&status);

    // One pass at 120 bpm is 2 s; stop just short of the 17th tick.
    let pass = (2.0 * sample_rate) as usize - 1;
    let mut fired: Vec<NoteTrigger> = Vec::new();
    let mut done = 0;
    while done < pass {
        let mut out: ArrayVec<NoteTrigger, TRIGGER_CAPACITY> = ArrayVec::new();
        done += sequencer.advance((pass - done).min(512), &pattern, &status, &mut out);
        fired.extend(out);
    }

    assert_eq!(fired.len(), 16);
    assert_eq!(status.ticks(), 16);
    for (i, trigger) in fired.iter().enumerate() {
        assert_eq!(trigger.step, i);
        assert_eq!(trigger.row, i % ROWS);
        assert_eq!(trigger.note, pattern.note_for_row(i % ROWS));
    }
}

#[test]
fn top_row_at_octave_five_is_b5() {
    let mut grid = Grid::new(StepCount::Sixteen);
    grid.set(0, 0, true).unwrap();
    let pattern = Pattern {
        grid,
        octave: 5,
        pitch: 0,
    };
    let status = TransportStatus::default();
    let mut sequencer = Sequencer::new(44100.0, 120.0, 0.05);
    sequencer.start(&status);

    let mut fired = Vec::new();
    let mut done = 0;
    while done < 88199 {
        let mut out: ArrayVec<NoteTrigger, TRIGGER_CAPACITY> = ArrayVec::new();
        done += sequencer.advance((88199 - done).min(1024), &pattern, &status, &mut out);
        fired.extend(out);
    }
    assert_eq!(fired.len(), 1);
    // B5: 12 * (5 + 1) + 11.
    assert_eq!(fired[0].note, 83);
}

#[test]
fn engine_ticks_through_one_pass() {
    let (mut session, mut engine) = session();
    for step in 0..16 {
        session.set_cell(step % ROWS, step, true).unwrap();
    }
    session.play().unwrap();
    // 22050 Hz, 120 bpm: 2756.25 frames per sixteenth.
    pump(&mut engine, 2 * 22050 - 1);
    let status = session.engine_status();
    assert_eq!(status.transport.ticks(), 16);
    assert_eq!(session.current_step(), Some(15));
    session.stop().unwrap();
    pump(&mut engine, 64);
    assert_eq!(session.current_step(), None);
}

#[test]
fn resize_keeps_the_first_sixteen_columns() {
    let (mut session, _engine) = session();
    let cells = [(0, 0), (4, 7), (11, 15), (6, 9)];
    for &(row, step) in &cells {
        session.set_cell(row, step, true).unwrap();
    }
    session.set_steps(StepCount::ThirtyTwo).unwrap();
    session.set_cell(1, 31, true).unwrap();
    session.set_steps(StepCount::Sixteen).unwrap();

    assert_eq!(session.grid().steps(), 16);
    for row in 0..ROWS {
        for step in 0..16 {
            assert_eq!(session.grid().get(row, step), cells.contains(&(row, step)));
        }
    }
}

#[tokio::test]
async fn save_and_load_through_a_store() {
    let store = MemoryStore::new("device-a");
    let (mut a, _ea) = session();
    a.set_cell(3, 3, true).unwrap();
    a.set_bpm(96.0).unwrap();
    a.set_pitch(-5).unwrap();
    a.set_enabled(EffectKind::Eq8, true).unwrap();
    a.set_parameter(EffectKind::Eq8, "g1000", 7.5).unwrap();
    a.set_enabled(EffectKind::BitCrusher, true).unwrap();

    let handle = a.save_to(&store, "groove").await.unwrap();
    let listing = a.list_from(&store).await.unwrap();
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].name, "groove");
    assert_eq!(listing[0].handle, handle);

    let (mut b, _eb) = session();
    b.load_from(&store, &handle).await.unwrap();
    assert_eq!(b.grid(), a.grid());
    assert_eq!(b.bpm(), 96.0);
    assert_eq!(b.pitch(), -5);
    assert_eq!(b.active_chain(), a.active_chain());
    assert!((b.parameter(EffectKind::Eq8, "g1000").unwrap() - 7.5).abs() < 1e-9);
}

#[tokio::test]
async fn blank_name_never_reaches_the_store() {
    let store = MemoryStore::new("device-a");
    let (session, _engine) = session();
    let err = session.save_to(&store, "   ").await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    assert!(store.is_empty());
    assert!(store.list("device-a").await.unwrap().is_empty());
}

#[test]
fn eq8_gains_survive_a_disable() {
    let (mut session, _engine) = session();
    session.set_enabled(EffectKind::Eq8, true).unwrap();
    session.set_parameter(EffectKind::Eq8, "g60", -9.0).unwrap();
    session.set_parameter(EffectKind::Eq8, "g8000", 4.5).unwrap();
    let before = session.parameters(EffectKind::Eq8);

    session.set_enabled(EffectKind::Eq8, false).unwrap();
    session.set_enabled(EffectKind::Eq8, true).unwrap();
    assert_eq!(session.parameters(EffectKind::Eq8), before);
}

#[test]
fn json_document_round_trip() {
    let (mut a, _ea) = session();
    a.set_steps(StepCount::ThirtyTwo).unwrap();
    a.set_cell(10, 28, true).unwrap();
    a.set_octave(3).unwrap();
    a.set_enabled(EffectKind::Reverb, true).unwrap();
    a.set_parameter(EffectKind::Lowpass, "frequency", 1234.5).unwrap();

    let json = a.snapshot("doc").unwrap().to_json().unwrap();
    let restored = Snapshot::from_json(&json).unwrap();
    let (mut b, _eb) = session();
    b.load(&restored).unwrap();

    assert_eq!(b.steps(), StepCount::ThirtyTwo);
    assert!(b.grid().get(10, 28));
    assert_eq!(b.octave(), 3);
    assert!(b.is_enabled(EffectKind::Reverb));
    assert!((b.parameter(EffectKind::Lowpass, "frequency").unwrap() - 1234.5).abs() < 1e-9);
}

#[test]
fn closed_session_goes_quiet() {
    let (mut session, mut engine) = session();
    session.set_cell(5, 0, true).unwrap();
    session.play().unwrap();
    let (left, _) = pump(&mut engine, 4096);
    assert!(left.iter().any(|s| s.abs() > 1e-4));

    session.close();
    session.close();
    let (left, right) = pump(&mut engine, 1024);
    assert!(engine.is_shut_down());
    assert!(left.iter().chain(&right).all(|s| *s == 0.0));
}

#[test]
fn toggling_one_stage_keeps_the_others_ringing() {
    let (mut session, mut engine) = session();
    session.set_parameter(EffectKind::Delay, "wet", 1.0).unwrap();
    session.set_parameter(EffectKind::Delay, "feedback", 0.9).unwrap();
    session.set_enabled(EffectKind::Delay, true).unwrap();
    session.set_cell(5, 0, true).unwrap();
    session.play().unwrap();
    pump(&mut engine, 1000);
    session.stop().unwrap();
    // Long enough for the synth note itself to have died away.
    pump(&mut engine, 22050);

    session.set_parameter(EffectKind::Distortion, "wet", 0.0).unwrap();
    session.set_enabled(EffectKind::Distortion, true).unwrap();
    let (left, _) = pump(&mut engine, 22050);
    let echo: f32 = left.iter().map(|s| s * s).sum();
    assert!(echo > 1e-3, "echo energy {echo}");
}
