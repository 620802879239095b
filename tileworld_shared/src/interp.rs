//! Interpolation.
//!
//! The simulation advances in discrete ticks while rendering runs at its own
//! rate. Every network-visible value keeps the last two committed states so a
//! renderer can blend between them with a fractional weight.

use crate::math::Vec2;

/// Blend function: `lerp(previous, current, weight)`.
pub type LerpFn<T> = fn(&T, &T, f32) -> T;

/// A previous/current pair with a blend function.
///
/// Exactly one step of history is kept.
#[derive(Clone)]
pub struct Interpolated<T> {
    previous: T,
    current: T,
    lerp: LerpFn<T>,
}

impl<T: Clone> Interpolated<T> {
    pub fn new(initial: T, lerp: LerpFn<T>) -> Self {
        Self {
            previous: initial.clone(),
            current: initial,
            lerp,
        }
    }

    pub fn current(&self) -> &T {
        &self.current
    }

    pub fn previous(&self) -> &T {
        &self.previous
    }

    /// Shifts current into previous and commits `value`.
    pub fn update(&mut self, value: T) {
        self.previous = std::mem::replace(&mut self.current, value);
    }

    /// Commits `value` as both states, dropping any motion in flight.
    pub fn reset(&mut self, value: T) {
        self.previous = value.clone();
        self.current = value;
    }

    /// Commits the current value again so the next delta starts from rest.
    pub fn settle(&mut self) {
        self.previous = self.current.clone();
    }

    /// Blended value for sub-tick rendering, `weight` in $[0,1)$.
    pub fn get(&self, weight: f32) -> T {
        (self.lerp)(&self.previous, &self.current, weight)
    }
}

impl<T: PartialEq> Interpolated<T> {
    /// True when the last `update` changed the value.
    pub fn changed(&self) -> bool {
        self.previous != self.current
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Interpolated<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpolated")
            .field("previous", &self.previous)
            .field("current", &self.current)
            .finish()
    }
}

/// Convenience constructor for positions.
pub fn interpolated_vec2(initial: Vec2) -> Interpolated<Vec2> {
    Interpolated::new(initial, |a, b, t| a.lerp(*b, t))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_shifts_one_step() {
        let mut p = interpolated_vec2(Vec2::new(0.0, 0.0));
        p.update(Vec2::new(4.0, 2.0));
        assert_eq!(*p.previous(), Vec2::new(0.0, 0.0));
        assert_eq!(*p.current(), Vec2::new(4.0, 2.0));

        p.update(Vec2::new(8.0, 2.0));
        assert_eq!(*p.previous(), Vec2::new(4.0, 2.0));
        assert_eq!(*p.current(), Vec2::new(8.0, 2.0));
    }

    #[test]
    fn get_blends_between_states() {
        let mut p = interpolated_vec2(Vec2::new(0.0, 0.0));
        p.update(Vec2::new(10.0, -10.0));
        assert_eq!(p.get(0.0), *p.previous());
        assert_eq!(p.get(1.0), *p.current());
        assert_eq!(p.get(0.5), Vec2::new(5.0, -5.0));
    }

    #[test]
    fn reset_and_settle_clear_motion() {
        let mut p = interpolated_vec2(Vec2::ZERO);
        p.update(Vec2::new(1.0, 1.0));
        assert!(p.changed());
        p.settle();
        assert!(!p.changed());
        assert_eq!(*p.previous(), Vec2::new(1.0, 1.0));

        p.reset(Vec2::new(9.0, 9.0));
        assert!(!p.changed());
        assert_eq!(p.get(0.3), Vec2::new(9.0, 9.0));
    }
}
