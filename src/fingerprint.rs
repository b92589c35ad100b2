use crate::output::OutputSet;
use glob::Pattern;
use serde::Serialize;
use std::collections::BTreeMap;

/// How outputs are paired between the live state and a stored profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdentityMode {
    /// Pair by connector name; the token value is irrelevant.
    #[default]
    ByName,
    /// Pair by panel identity, so a panel that moves to another connector
    /// still matches.
    ByEdid,
}

/// Canonical signature of the connected outputs: connector name mapped to
/// the panel's identity token. Derived, never persisted on its own — a
/// profile's `setup` file is the same mapping written out line by line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fingerprint {
    entries: BTreeMap<String, String>,
}

impl Fingerprint {
    pub fn from_entries(entries: BTreeMap<String, String>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &BTreeMap<String, String> {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The `setup` file representation, one `<name> <token>` line per output.
    pub fn setup_lines(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|(name, token)| format!("{} {}", name, token))
            .collect()
    }

    /// Whether the live fingerprint satisfies a stored one. Stored identity
    /// tokens may contain glob wildcards.
    pub fn matches(&self, stored: &Fingerprint, mode: IdentityMode) -> bool {
        match mode {
            IdentityMode::ByName => {
                self.entries.len() == stored.entries.len()
                    && self.entries.keys().eq(stored.entries.keys())
            }
            IdentityMode::ByEdid => {
                if self.entries.len() != stored.entries.len() {
                    return false;
                }
                // Pair each stored token with a distinct live token.
                let mut live: Vec<&String> = self.entries.values().collect();
                for token in stored.entries.values() {
                    match live.iter().position(|l| tokens_equal(token, l)) {
                        Some(idx) => {
                            live.swap_remove(idx);
                        }
                        None => return false,
                    }
                }
                true
            }
        }
    }
}

fn tokens_equal(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    if a.contains('*') {
        if let Ok(pattern) = Pattern::new(a) {
            return pattern.matches(b);
        }
    }
    if b.contains('*') {
        if let Ok(pattern) = Pattern::new(b) {
            return pattern.matches(a);
        }
    }
    false
}

/// Derive the fingerprint of a queried output set.
///
/// Only connected outputs contribute. When `honor_lid` is set, a connected
/// internal panel whose lid is closed is treated as disconnected — unless
/// every connected output is in that state, in which case the suppression is
/// skipped so the fingerprint never claims nothing is connected.
pub fn fingerprint(outputs: &OutputSet, honor_lid: bool) -> Fingerprint {
    let connected: Vec<_> = outputs.values().filter(|o| o.connected).collect();
    let suppress = honor_lid && connected.iter().any(|o| !o.lid_closed);

    let mut entries = BTreeMap::new();
    for output in connected {
        if suppress && output.lid_closed {
            continue;
        }
        if let Some(token) = output.identity_token() {
            entries.insert(output.name.clone(), token);
        }
    }
    Fingerprint { entries }
}
