//! User-editable keybind configuration, read from a text file adjacent to
//! the socket directory (§4.F). Malformed config falls back to defaults
//! with a warning rather than failing — it's an optional override, not a
//! required input.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Action a prefix-key chord runs against the active client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyAction {
    Detach,
    PaneSplit,
    NextPane,
    ScrollUp,
    ScrollDown,
    ToggleSyncInput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Lowercase-char -> action. Looked up after lowercasing the byte that
    /// follows the prefix key (§4.F).
    pub keybinds: Vec<(char, KeyAction)>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            keybinds: vec![
                ('d', KeyAction::Detach),
                ('%', KeyAction::PaneSplit),
                ('o', KeyAction::NextPane),
                ('[', KeyAction::ScrollUp),
                (']', KeyAction::ScrollDown),
            ],
        }
    }
}

impl Config {
    pub fn action_for(&self, key: char) -> Option<KeyAction> {
        self.keybinds
            .iter()
            .find(|(c, _)| *c == key)
            .map(|(_, a)| *a)
    }

    /// Load from `path`, falling back to defaults (with a warning) on any
    /// read or parse error — the config file is optional.
    pub fn load_or_default(path: &Path) -> Config {
        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(cfg) => cfg,
                Err(e) => {
                    tracing::warn!("ignoring malformed keybind config {path:?}: {e}");
                    Config::default()
                }
            },
            Err(_) => Config::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_binds_match_spec() {
        let cfg = Config::default();
        assert_eq!(cfg.action_for('d'), Some(KeyAction::Detach));
        assert_eq!(cfg.action_for('%'), Some(KeyAction::PaneSplit));
        assert_eq!(cfg.action_for('o'), Some(KeyAction::NextPane));
        assert_eq!(cfg.action_for('['), Some(KeyAction::ScrollUp));
        assert_eq!(cfg.action_for(']'), Some(KeyAction::ScrollDown));
        assert_eq!(cfg.action_for('z'), None);
    }

    #[test]
    fn missing_file_falls_back_to_default() {
        let cfg = Config::load_or_default(Path::new("/nonexistent/muxkit/keys.json"));
        assert_eq!(cfg.action_for('d'), Some(KeyAction::Detach));
    }
}
