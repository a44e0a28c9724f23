//! Majority-vote smoothing over the last few classifications.

use crate::types::EmotionLabel;
use std::collections::VecDeque;

pub const DEFAULT_WINDOW_SIZE: usize = 5;

/// Bounded FIFO of recent `(label, confidence)` pairs.
#[derive(Debug, Clone)]
pub struct SmoothingWindow {
    entries: VecDeque<(EmotionLabel, f32)>,
    capacity: usize,
}

impl Default for SmoothingWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}

impl SmoothingWindow {
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Append a classification and return the smoothed `(label, confidence)`.
    ///
    /// The label is the window's mode; on a tie, the label whose first
    /// occurrence in the window is earliest wins. The confidence is the mean
    /// of every confidence in the window, not only the winner's.
    pub fn push(&mut self, label: EmotionLabel, confidence: f32) -> (EmotionLabel, f32) {
        self.entries.push_back((label, confidence));
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
        // The window is non-empty after a push.
        self.smoothed().unwrap_or((label, confidence))
    }

    /// Current smoothed value without mutating the window.
    pub fn smoothed(&self) -> Option<(EmotionLabel, f32)> {
        // Counts in first-occurrence order.
        let mut counts: Vec<(EmotionLabel, usize)> = Vec::with_capacity(EmotionLabel::COUNT);
        let mut total = 0.0f32;
        for &(label, confidence) in &self.entries {
            match counts.iter_mut().find(|(l, _)| *l == label) {
                Some((_, n)) => *n += 1,
                None => counts.push((label, 1)),
            }
            total += confidence;
        }

        let (label, _) = counts.iter().fold(None, |best: Option<(EmotionLabel, usize)>, &(l, n)| match best {
            Some((_, best_n)) if best_n >= n => best,
            _ => Some((l, n)),
        })?;

        Some((label, total / self.entries.len() as f32))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Entries oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &(EmotionLabel, f32)> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EmotionLabel::*;

    #[test]
    fn test_mean_confidence() {
        let mut window = SmoothingWindow::new(5);
        window.push(Happy, 0.2);
        window.push(Happy, 0.4);
        let (_, conf) = window.push(Happy, 0.6);
        assert!((conf - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_mean_includes_losing_labels() {
        let mut window = SmoothingWindow::new(5);
        window.push(Sad, 0.9);
        window.push(Happy, 0.3);
        let (label, conf) = window.push(Happy, 0.3);
        assert_eq!(label, Happy);
        assert!((conf - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_majority_vote() {
        let mut window = SmoothingWindow::new(5);
        window.push(Happy, 0.5);
        window.push(Happy, 0.5);
        let (label, _) = window.push(Sad, 0.9);
        assert_eq!(label, Happy);
    }

    #[test]
    fn test_tie_keeps_earliest_first_occurrence() {
        for _ in 0..10 {
            let mut window = SmoothingWindow::new(5);
            window.push(Happy, 0.5);
            let (label, _) = window.push(Sad, 0.5);
            assert_eq!(label, Happy);
        }

        // First occurrence decides, not the most recent run.
        let mut window = SmoothingWindow::new(5);
        window.push(Sad, 0.5);
        window.push(Happy, 0.5);
        window.push(Happy, 0.5);
        let (label, _) = window.push(Sad, 0.5);
        assert_eq!(label, Sad);
    }

    #[test]
    fn test_fifo_eviction() {
        let mut window = SmoothingWindow::new(5);
        for label in [Angry, Happy, Happy, Sad, Fear] {
            window.push(label, 0.5);
        }
        assert_eq!(window.len(), 5);

        window.push(Neutral, 0.5);
        assert_eq!(window.len(), 5);
        let labels: Vec<EmotionLabel> = window.iter().map(|(l, _)| *l).collect();
        assert_eq!(labels, vec![Happy, Happy, Sad, Fear, Neutral]);
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let mut window = SmoothingWindow::new(3);
        for i in 0..50 {
            window.push(EmotionLabel::ALL[i % EmotionLabel::COUNT], 0.1);
            assert!(window.len() <= 3);
        }
    }

    #[test]
    fn test_eviction_changes_vote() {
        let mut window = SmoothingWindow::new(3);
        window.push(Sad, 0.5);
        window.push(Sad, 0.5);
        window.push(Happy, 0.5);
        assert_eq!(window.push(Happy, 0.5).0, Happy);
    }

    #[test]
    fn test_push_is_not_idempotent() {
        let mut window = SmoothingWindow::new(5);
        window.push(Angry, 1.0);
        window.push(Angry, 1.0);
        window.push(Happy, 0.0);
        let first = window.push(Happy, 0.0);
        let second = window.push(Happy, 0.0);
        assert_eq!(window.len(), 5);
        assert_eq!(first.0, Angry);
        assert_eq!(second.0, Happy);
    }

    #[test]
    fn test_zero_capacity_is_raised() {
        let mut window = SmoothingWindow::new(0);
        assert_eq!(window.capacity(), 1);
        window.push(Sad, 0.2);
        assert_eq!(window.push(Fear, 0.8), (Fear, 0.8));
    }

    #[test]
    fn test_empty_and_clear() {
        let mut window = SmoothingWindow::default();
        assert_eq!(window.capacity(), DEFAULT_WINDOW_SIZE);
        assert!(window.smoothed().is_none());
        window.push(Happy, 0.7);
        assert!(!window.is_empty());
        window.clear();
        assert!(window.is_empty());
    }
}
