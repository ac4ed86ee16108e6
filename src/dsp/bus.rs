//! Input bus: where every source is summed before the effect chain.

/// Preallocated stereo scratch plus the bus gain.
#[derive(Debug, Clone)]
pub struct StereoBus {
    pub left: Vec<f32>,
    pub right: Vec<f32>,
    pub gain: f32,
}

impl StereoBus {
    pub fn new(capacity: usize, gain: f32) -> Self {
        StereoBus {
            left: vec![0.0; capacity],
            right: vec![0.0; capacity],
            gain,
        }
    }

    pub fn capacity(&self) -> usize {
        self.left.len()
    }

    /// Zero the first `frames` frames.
    pub fn clear(&mut self, frames: usize) {
        let n = frames.min(self.capacity());
        self.left[..n].fill(0.0);
        self.right[..n].fill(0.0);
    }

    /// Apply the bus gain to the first `frames` frames.
    pub fn apply_gain(&mut self, frames: usize) {
        let n = frames.min(self.capacity());
        let g = self.gain;
        for s in self.left[..n].iter_mut().chain(self.right[..n].iter_mut()) {
            *s *= g;
        }
    }
}

/// Soft clipper using tanh to keep the device output inside [-1, 1].
#[inline]
pub fn soft_clip(x: f32) -> f32 {
    x.tanh()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_and_gain() {
        let mut bus = StereoBus::new(4, 0.5);
        bus.left.copy_from_slice(&[1.0, 1.0, 1.0, 1.0]);
        bus.right.copy_from_slice(&[-1.0, -1.0, -1.0, -1.0]);
        bus.apply_gain(2);
        assert_eq!(bus.left, vec![0.5, 0.5, 1.0, 1.0]);
        assert_eq!(bus.right[1], -0.5);
        bus.clear(10);
        assert!(bus.left.iter().chain(&bus.right).all(|&s| s == 0.0));
    }

    #[test]
    fn soft_clip_bounds_output() {
        assert!(soft_clip(100.0) <= 1.0);
        assert!((soft_clip(0.01) - 0.01).abs() < 1e-5);
    }
}
