//! Prefix-key (Ctrl-B) dispatch (§4.F "Prefix-key dispatch").

use crate::config::{Config, KeyAction};

pub const PREFIX_BYTE: u8 = 0x02;

/// Tracks whether the previous byte was an unconsumed Ctrl-B, persisting
/// across calls the way the teacher's and spec's static flag does.
#[derive(Default)]
pub struct PrefixState {
    pending: bool,
}

/// Result of feeding one stdin byte through the prefix gate.
pub enum Dispatch {
    /// Forward these raw bytes to the active pane unchanged.
    Forward(Vec<u8>),
    /// Run this bound action.
    Action(KeyAction),
    /// The prefix was just armed; nothing to do yet.
    Armed,
}

impl PrefixState {
    /// `0x02 0x02` forwarded while the flag is unset writes exactly one
    /// `0x02` and leaves the flag clear (§8 property 6).
    pub fn feed(&mut self, byte: u8, config: &Config) -> Dispatch {
        if !self.pending {
            if byte == PREFIX_BYTE {
                self.pending = true;
                return Dispatch::Armed;
            }
            return Dispatch::Forward(vec![byte]);
        }

        self.pending = false;
        if byte == PREFIX_BYTE {
            return Dispatch::Forward(vec![PREFIX_BYTE]);
        }
        let lowered = (byte as char).to_ascii_lowercase();
        match config.action_for(lowered) {
            Some(action) => Dispatch::Action(action),
            None => Dispatch::Forward(vec![PREFIX_BYTE, byte]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_ctrl_b_forwards_exactly_one_byte() {
        let mut state = PrefixState::default();
        let config = Config::default();
        assert!(matches!(state.feed(0x02, &config), Dispatch::Armed));
        match state.feed(0x02, &config) {
            Dispatch::Forward(bytes) => assert_eq!(bytes, vec![0x02]),
            _ => panic!("expected Forward"),
        }
        assert!(!state.pending);
    }

    #[test]
    fn bound_key_after_prefix_runs_action() {
        let mut state = PrefixState::default();
        let config = Config::default();
        let _ = state.feed(0x02, &config);
        match state.feed(b'd', &config) {
            Dispatch::Action(KeyAction::Detach) => {}
            _ => panic!("expected Detach action"),
        }
    }

    #[test]
    fn unbound_key_after_prefix_forwards_both_bytes() {
        let mut state = PrefixState::default();
        let config = Config::default();
        let _ = state.feed(0x02, &config);
        match state.feed(b'q', &config) {
            Dispatch::Forward(bytes) => assert_eq!(bytes, vec![0x02, b'q']),
            _ => panic!("expected Forward"),
        }
    }
}
