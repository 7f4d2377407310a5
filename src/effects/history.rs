use std::collections::VecDeque;

/// Fixed-capacity history of the most recent normalized samples, oldest first.
#[derive(Debug, Clone)]
pub struct RollingAudioBuffer {
    samples: VecDeque<f32>,
    capacity: usize,
}

impl RollingAudioBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Two seconds at `sample_rate`.
    pub fn for_rate(sample_rate: u32) -> Self {
        Self::new(sample_rate as usize * 2)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Append `chunk`, evicting the oldest samples once capacity is exceeded.
    pub fn add_chunk(&mut self, chunk: &[f32]) {
        if self.capacity == 0 {
            return;
        }
        if chunk.len() >= self.capacity {
            self.samples.clear();
            self.samples
                .extend(&chunk[chunk.len() - self.capacity..]);
            return;
        }
        let overflow = (self.samples.len() + chunk.len()).saturating_sub(self.capacity);
        self.samples.drain(..overflow);
        self.samples.extend(chunk);
    }

    /// The most recent `length` samples, or everything when fewer are held.
    pub fn get(&self, length: usize) -> Vec<f32> {
        let skip = self.samples.len().saturating_sub(length);
        self.samples.iter().skip(skip).copied().collect()
    }

    pub fn get_all(&self) -> Vec<f32> {
        self.samples.iter().copied().collect()
    }

    /// Sample `offset` positions back from the newest one (0 = newest).
    pub fn sample_back(&self, offset: usize) -> Option<f32> {
        let len = self.samples.len();
        if offset >= len {
            return None;
        }
        self.samples.get(len - 1 - offset).copied()
    }
}
