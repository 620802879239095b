//! Per-tick input state.
//!
//! Input is sampled once per tick into an explicit value that is handed to the
//! simulation, so physics never reads global keyboard state.

bitflags::bitflags! {
    /// Logical buttons understood by the simulation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Buttons: u16 {
        const LEFT = 1 << 0;
        const RIGHT = 1 << 1;
        const UP = 1 << 2;
        const DOWN = 1 << 3;
        const JUMP = 1 << 4;
        /// Let go of a ladder.
        const DISMOUNT = 1 << 5;
        /// Interact with the object under the player.
        const USE = 1 << 6;
    }
}

/// Input sampled for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InputState {
    pub buttons: Buttons,
}

impl InputState {
    pub fn new(buttons: Buttons) -> Self {
        Self { buttons }
    }

    pub fn is_pressed(&self, button: Buttons) -> bool {
        self.buttons.contains(button)
    }

    /// Horizontal intent: -1, 0 or 1. Holding both directions cancels out.
    pub fn horizontal(&self) -> f32 {
        match (self.is_pressed(Buttons::LEFT), self.is_pressed(Buttons::RIGHT)) {
            (true, false) => -1.0,
            (false, true) => 1.0,
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opposite_directions_cancel() {
        assert_eq!(InputState::new(Buttons::LEFT).horizontal(), -1.0);
        assert_eq!(InputState::new(Buttons::RIGHT | Buttons::JUMP).horizontal(), 1.0);
        assert_eq!(InputState::new(Buttons::LEFT | Buttons::RIGHT).horizontal(), 0.0);
        assert_eq!(InputState::default().horizontal(), 0.0);
    }
}
