//! Sliding visibility window over the slide list
//!
//! Only slides near the current index keep real textures. This module is pure
//! index arithmetic plus the per-slide state table; the instance applies the
//! resulting `WindowPlan`.

use log::{debug, warn};

use crate::error::StateError;

/// Per-slide resource lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SlideState {
    #[default]
    Uninitialized,
    /// Showing the shared placeholder texture
    Placeholder,
    Loading,
    Loaded,
    /// Load failed; still shows the placeholder, may be retried
    Error,
}

impl SlideState {
    /// Whether `self -> next` is an allowed transition
    pub fn can_transition_to(self, next: SlideState) -> bool {
        use SlideState::*;

        matches!(
            (self, next),
            (Uninitialized, Loading)
                | (Uninitialized, Placeholder)
                | (Loading, Loaded)
                | (Loading, Error)
                | (Loading, Placeholder)
                | (Loaded, Placeholder)
                | (Placeholder, Loading)
                | (Error, Loading)
                | (Error, Placeholder)
        )
    }
}

/// State of every slide, with validated transitions
#[derive(Debug, Clone, Default)]
pub struct SlideStateTable {
    states: Vec<SlideState>,
}

impl SlideStateTable {
    pub fn new(count: usize) -> Self {
        Self {
            states: vec![SlideState::Uninitialized; count],
        }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<SlideState> {
        self.states.get(index).copied()
    }

    /// Moves a slide to `next`. Re-entering the current state is a no-op.
    pub fn transition(&mut self, index: usize, next: SlideState) -> Result<SlideState, StateError> {
        let count = self.states.len();
        let current = self
            .states
            .get_mut(index)
            .ok_or(StateError::OutOfRange { index, count })?;

        if *current == next {
            return Ok(next);
        }
        if !current.can_transition_to(next) {
            return Err(StateError::InvalidTransition {
                index,
                from: *current,
                to: next,
            });
        }

        *current = next;
        Ok(next)
    }

    /// Grows or shrinks the table; new slides start `Uninitialized`
    pub fn resize(&mut self, count: usize) {
        self.states.resize(count, SlideState::Uninitialized);
    }

    pub fn count_in(&self, state: SlideState) -> usize {
        self.states.iter().filter(|s| **s == state).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, SlideState)> + '_ {
        self.states.iter().copied().enumerate()
    }
}

/// What to load and what to unload after the current index moved
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowPlan {
    pub window: Vec<usize>,
    pub promote: Vec<usize>,
    pub demote: Vec<usize>,
}

/// Computes which slides stay resident around the current index
#[derive(Debug, Clone)]
pub struct SlidingWindowManager {
    total_count: usize,
    window_size: usize,
    looping: bool,
    current: usize,
}

impl SlidingWindowManager {
    pub fn new(total_count: usize, window_size: usize, looping: bool) -> Self {
        debug!(
            "🪟 Sliding window: {} slides, radius {}, looping {}",
            total_count, window_size, looping
        );
        Self {
            total_count,
            window_size,
            looping,
            current: 0,
        }
    }

    /// Moves the window. Out-of-range indices are clamped. Returns the index used.
    pub fn update_current_index(&mut self, index: usize) -> usize {
        if self.total_count == 0 {
            self.current = 0;
            return 0;
        }

        if index >= self.total_count {
            warn!(
                "Slide index {} out of range ({} slides), clamping",
                index, self.total_count
            );
        }
        self.current = index.min(self.total_count - 1);
        self.current
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn total_count(&self) -> usize {
        self.total_count
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    pub fn set_window_size(&mut self, window_size: usize) {
        self.window_size = window_size;
    }

    pub fn set_total_count(&mut self, total_count: usize) {
        self.total_count = total_count;
        if total_count == 0 {
            self.current = 0;
        } else if self.current >= total_count {
            self.update_current_index(self.current);
        }
    }

    /// Distance from the current index: circular when looping, linear otherwise
    pub fn distance(&self, index: usize) -> usize {
        let direct = index.abs_diff(self.current);
        if self.looping && self.total_count > 0 {
            direct.min(self.total_count - direct % self.total_count)
        } else {
            direct
        }
    }

    pub fn contains(&self, index: usize) -> bool {
        index < self.total_count && self.distance(index) <= self.window_size
    }

    /// Slide indices in the window, from farthest behind to farthest ahead
    pub fn window_indices(&self) -> Vec<usize> {
        let total = self.total_count;
        if total == 0 {
            return Vec::new();
        }
        if total <= 2 * self.window_size + 1 {
            return (0..total).collect();
        }

        let radius = self.window_size as isize;
        let current = self.current as isize;

        if self.looping {
            let n = total as isize;
            (-radius..=radius)
                .map(|offset| (current + offset).rem_euclid(n) as usize)
                .collect()
        } else {
            let start = (current - radius).max(0) as usize;
            let end = ((current + radius) as usize).min(total - 1);
            (start..=end).collect()
        }
    }

    /// True for slides far enough away to drop back to a placeholder.
    /// The margin of one slide past the window avoids thrashing at the edge.
    pub fn should_demote(&self, index: usize) -> bool {
        index != self.current && self.distance(index) > self.window_size + 1
    }

    /// Promotion and demotion lists for the current position
    pub fn plan(&self, states: &SlideStateTable) -> WindowPlan {
        let window = self.window_indices();

        let promote = window
            .iter()
            .copied()
            .filter(|&i| {
                !matches!(
                    states.get(i),
                    Some(SlideState::Loaded) | Some(SlideState::Loading) | None
                )
            })
            .collect();

        let demote = states
            .iter()
            .filter(|&(i, state)| state == SlideState::Loaded && self.should_demote(i))
            .map(|(i, _)| i)
            .collect();

        WindowPlan {
            window,
            promote,
            demote,
        }
    }
}
