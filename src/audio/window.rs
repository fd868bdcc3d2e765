//! Fixed-size sliding window over the most recent audio samples.

/// A sliding window sized to a model's input feature count.
///
/// Appending shifts the oldest samples out with an in-place copy; the
/// buffer is allocated once and never grows. Owned exclusively by the
/// capture side of the audio pipeline — only snapshots cross threads.
#[derive(Debug)]
pub struct SampleWindow {
    samples: Vec<f64>,
    filled: usize,
}

impl SampleWindow {
    pub fn new(len: usize) -> Self {
        SampleWindow {
            samples: vec![0.0; len],
            filled: 0,
        }
    }

    /// Appends samples, evicting the oldest ones FIFO when the window is
    /// full. When `new` is larger than the window only its tail is kept.
    pub fn push(&mut self, new: &[f64]) {
        let len = self.samples.len();
        let new = if new.len() > len {
            &new[new.len() - len..]
        } else {
            new
        };
        if self.filled + new.len() > len {
            let shift = self.filled + new.len() - len;
            self.samples.copy_within(shift..self.filled, 0);
            self.filled -= shift;
        }
        self.samples[self.filled..self.filled + new.len()].copy_from_slice(new);
        self.filled += new.len();
    }

    /// True once the window holds a full model input.
    pub fn is_full(&self) -> bool {
        self.filled == self.samples.len()
    }

    /// Copies the window contents, oldest sample first.
    pub fn snapshot(&self) -> Vec<f64> {
        self.samples.clone()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_fills_in_order() {
        let mut window = SampleWindow::new(4);
        assert!(!window.is_full());

        window.push(&[1.0, 2.0]);
        assert!(!window.is_full());

        window.push(&[3.0, 4.0]);
        assert!(window.is_full());
        assert_eq!(window.snapshot(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_window_evicts_oldest_fifo() {
        let mut window = SampleWindow::new(4);
        window.push(&[1.0, 2.0, 3.0, 4.0]);
        window.push(&[5.0, 6.0]);
        assert_eq!(window.snapshot(), vec![3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_window_keeps_most_recent_samples_over_many_appends() {
        // After K appends the window must hold exactly the most recent
        // samples in chronological order, however large K grows.
        let mut window = SampleWindow::new(5);
        let mut next = 0.0;
        for _ in 0..13 {
            let chunk: Vec<f64> = (0..3)
                .map(|_| {
                    next += 1.0;
                    next
                })
                .collect();
            window.push(&chunk);
        }
        // 13 appends * 3 samples = 39 samples total; expect 35..=39.
        assert_eq!(window.snapshot(), vec![35.0, 36.0, 37.0, 38.0, 39.0]);
    }

    #[test]
    fn test_push_larger_than_window_keeps_tail() {
        let mut window = SampleWindow::new(3);
        window.push(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!(window.is_full());
        assert_eq!(window.snapshot(), vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_push_exactly_window_size() {
        let mut window = SampleWindow::new(3);
        window.push(&[1.0, 2.0, 3.0]);
        assert!(window.is_full());
        window.push(&[4.0, 5.0, 6.0]);
        assert_eq!(window.snapshot(), vec![4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_partial_window_is_not_full() {
        let mut window = SampleWindow::new(8);
        window.push(&[1.0, 2.0, 3.0]);
        window.push(&[4.0, 5.0]);
        assert!(!window.is_full());
    }
}
