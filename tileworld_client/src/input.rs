//! Input handling.
//!
//! Key state is polled once per tick through an [`InputSource`] and turned
//! into the [`InputState`] the simulation consumes. Key codes follow the
//! DOM `KeyboardEvent.code` names (`KeyA`, `Space`, ...).

use std::collections::HashSet;

use tileworld_shared::input::{Buttons, InputState};

/// Anything that can answer "is this key down right now".
pub trait InputSource {
    fn is_pressed(&self, code: &str) -> bool;
}

/// Held keys, fed by whatever produces key events.
#[derive(Debug, Default, Clone)]
pub struct KeyboardState {
    held: HashSet<String>,
}

impl KeyboardState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn press(&mut self, code: &str) {
        self.held.insert(code.to_string());
    }

    pub fn release(&mut self, code: &str) {
        self.held.remove(code);
    }

    pub fn release_all(&mut self) {
        self.held.clear();
    }

    /// Applies a `+Code` (press) or `-Code` (release) line. Returns false for
    /// anything else.
    pub fn apply_line(&mut self, line: &str) -> bool {
        let line = line.trim();
        if let Some(code) = line.strip_prefix('+') {
            self.press(code);
            true
        } else if let Some(code) = line.strip_prefix('-') {
            self.release(code);
            true
        } else {
            false
        }
    }
}

impl InputSource for KeyboardState {
    fn is_pressed(&self, code: &str) -> bool {
        self.held.contains(code)
    }
}

/// Key code -> button table.
#[derive(Debug, Clone)]
pub struct KeyBindings {
    bindings: Vec<(String, Buttons)>,
}

impl Default for KeyBindings {
    fn default() -> Self {
        Self::new([
            ("KeyA", Buttons::LEFT),
            ("KeyD", Buttons::RIGHT),
            ("KeyW", Buttons::UP),
            ("KeyS", Buttons::DOWN),
            ("Space", Buttons::JUMP),
            ("KeyX", Buttons::DISMOUNT),
            ("KeyF", Buttons::USE),
        ])
    }
}

impl KeyBindings {
    pub fn new<'a>(pairs: impl IntoIterator<Item = (&'a str, Buttons)>) -> Self {
        Self {
            bindings: pairs
                .into_iter()
                .map(|(code, button)| (code.to_string(), button))
                .collect(),
        }
    }

    /// Binds one more key; several keys may map to the same button.
    pub fn bind(&mut self, code: &str, button: Buttons) {
        self.bindings.push((code.to_string(), button));
    }

    pub fn sample(&self, source: &dyn InputSource) -> InputState {
        let mut buttons = Buttons::empty();
        for (code, button) in &self.bindings {
            if source.is_pressed(code) {
                buttons |= *button;
            }
        }
        InputState::new(buttons)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_bindings_sample_held_keys() {
        let mut keys = KeyboardState::new();
        keys.press("KeyD");
        keys.press("Space");
        let input = KeyBindings::default().sample(&keys);
        assert_eq!(input.buttons, Buttons::RIGHT | Buttons::JUMP);

        keys.release("Space");
        assert_eq!(KeyBindings::default().sample(&keys).buttons, Buttons::RIGHT);
    }

    #[test]
    fn extra_binding_and_line_protocol() {
        let mut bindings = KeyBindings::default();
        bindings.bind("ArrowLeft", Buttons::LEFT);

        let mut keys = KeyboardState::new();
        assert!(keys.apply_line("+ArrowLeft"));
        assert!(bindings.sample(&keys).is_pressed(Buttons::LEFT));
        assert!(keys.apply_line(" -ArrowLeft "));
        assert!(!bindings.sample(&keys).is_pressed(Buttons::LEFT));
        assert!(!keys.apply_line("status"));
    }
}
