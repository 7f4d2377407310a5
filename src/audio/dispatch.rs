use crossbeam_channel::{Sender, TrySendError};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

/// Average interleaved channels into mono while converting the device sample type.
pub(super) fn append_downmixed_samples<T, F>(
    buf: &mut Vec<f32>,
    data: &[T],
    channels: usize,
    mut convert: F,
) where
    T: Copy,
    F: FnMut(T) -> f32,
{
    if channels <= 1 {
        buf.extend(data.iter().copied().map(&mut convert));
        return;
    }
    for group in data.chunks(channels) {
        let sum: f32 = group.iter().copied().map(&mut convert).sum();
        buf.push(sum / group.len() as f32);
    }
}

/// Runs inside the cpal callback: downmixes, slices device-rate blocks and
/// hands them to the capture thread without ever blocking.
pub(super) struct FrameDispatcher {
    block_samples: usize,
    pending: Vec<f32>,
    sender: Sender<Vec<f32>>,
    dropped: Arc<AtomicUsize>,
}

impl FrameDispatcher {
    pub(super) fn new(
        block_samples: usize,
        sender: Sender<Vec<f32>>,
        dropped: Arc<AtomicUsize>,
    ) -> Self {
        let block_samples = block_samples.max(1);
        Self {
            block_samples,
            pending: Vec::with_capacity(block_samples * 2),
            sender,
            dropped,
        }
    }

    pub(super) fn push<T, F>(&mut self, data: &[T], channels: usize, convert: F)
    where
        T: Copy,
        F: FnMut(T) -> f32,
    {
        append_downmixed_samples(&mut self.pending, data, channels, convert);

        while self.pending.len() >= self.block_samples {
            let block: Vec<f32> = self.pending.drain(..self.block_samples).collect();
            match self.sender.try_send(block) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Disconnected(_)) => {
                    self.pending.clear();
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    #[test]
    fn downmix_averages_channels() {
        let mut buf = Vec::new();
        append_downmixed_samples(&mut buf, &[1.0f32, 0.0, 0.5, 0.5], 2, |s| s);
        assert_eq!(buf, vec![0.5, 0.5]);
    }

    #[test]
    fn downmix_handles_partial_trailing_group() {
        let mut buf = Vec::new();
        append_downmixed_samples(&mut buf, &[1.0f32, 1.0, 0.4], 2, |s| s);
        assert_eq!(buf.len(), 2);
        assert!((buf[1] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn dispatcher_counts_drops_when_channel_full() {
        let (tx, rx) = bounded(1);
        let dropped = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = FrameDispatcher::new(2, tx, dropped.clone());
        dispatcher.push(&[0i16, 1, 2, 3, 4, 5], 1, |s| f32::from(s));
        assert_eq!(rx.len(), 1);
        assert_eq!(dropped.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn dispatcher_keeps_remainder_for_next_callback() {
        let (tx, rx) = bounded(4);
        let dropped = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = FrameDispatcher::new(4, tx, dropped);
        dispatcher.push(&[0.1f32, 0.2, 0.3], 1, |s| s);
        assert!(rx.is_empty());
        dispatcher.push(&[0.4f32], 1, |s| s);
        assert_eq!(rx.try_recv().ok(), Some(vec![0.1, 0.2, 0.3, 0.4]));
    }
}
