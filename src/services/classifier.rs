//! Device role classification from reported model names
//!
//! The vendor service reports a free-form model string ("NV200", "SMART
//! Coin System", ...); which logical role a device fills is inferred from
//! substrings of that string. The heuristic is deliberately pluggable, and
//! an unrecognised model falls back to an explicit positional policy: the
//! first unclassified probed device is the note acceptor, the second the
//! coin acceptor.

use crate::domain::types::DeviceRole;

/// Classification outcome - `Unknown` hands the decision to the fallback
/// policy rather than guessing inside the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classified {
    Note,
    Coin,
    Unknown,
}

pub trait RoleClassifier: Send + Sync {
    fn classify(&self, model: &str) -> Classified;
}

/// Default substring-based classifier
pub struct ModelNameClassifier {
    note_markers: Vec<&'static str>,
    coin_markers: Vec<&'static str>,
}

impl Default for ModelNameClassifier {
    fn default() -> Self {
        Self {
            note_markers: vec!["NV", "SPECTRAL", "NOTE"],
            coin_markers: vec!["COIN", "SCM", "HOPPER"],
        }
    }
}

impl RoleClassifier for ModelNameClassifier {
    fn classify(&self, model: &str) -> Classified {
        let upper = model.to_uppercase();
        // Coin markers win over note markers: "SMART COIN NV-series" style
        // strings exist, plain "NV" prefixes on coin units do not.
        if self.coin_markers.iter().any(|m| upper.contains(m)) {
            return Classified::Coin;
        }
        if self.note_markers.iter().any(|m| upper.contains(m)) {
            return Classified::Note;
        }
        Classified::Unknown
    }
}

/// Positional fallback for unclassified devices: first probed device is the
/// note acceptor, every later one the coin acceptor.
pub fn fallback_role(probe_index: usize) -> DeviceRole {
    if probe_index == 0 {
        DeviceRole::Note
    } else {
        DeviceRole::Coin
    }
}
