use crate::change;
use crate::fingerprint::{Fingerprint, IdentityMode};
use crate::hooks::{HookEnv, Hooks};
use crate::output::OutputSet;
use crate::profile::{Profile, ProfileStore};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Caller-supplied knobs that influence selection.
#[derive(Debug, Default)]
pub struct Hints {
    /// Fallback profile when nothing matches exactly.
    pub default_profile: Option<String>,
    /// Rotate through the detected profiles instead of picking the first.
    pub cycle: bool,
    pub identity_mode: IdentityMode,
    /// Option names excluded when deciding which profile is presently active.
    pub skip_options: BTreeSet<String>,
}

/// Profiles whose stored fingerprint matches the live one exactly, in the
/// store's stable name order. Block hooks are not consulted here.
pub fn detected_profiles<'a>(
    current: &Fingerprint,
    store: &'a ProfileStore,
    mode: IdentityMode,
) -> Vec<&'a Profile> {
    store
        .iter()
        .filter(|p| current.matches(&p.setup, mode))
        .collect()
}

/// Profiles whose target configuration the live configuration already
/// satisfies, in stable name order.
pub fn active_profiles<'a>(
    live: &OutputSet,
    store: &'a ProfileStore,
    skip_options: &BTreeSet<String>,
) -> Vec<&'a Profile> {
    store
        .iter()
        .filter(|p| !change::needs_change(live, &p.config, skip_options))
        .collect()
}

/// Choose the profile to load for the current hardware state, or None when
/// the configuration should be left alone.
///
/// Blocked profiles are never candidates; their block hooks run fresh on
/// every call. Among exact matches the first in name order wins (several
/// exact matches is a configuration smell, not an error). With no exact
/// match the configured default is used if present and unblocked. `cycle`
/// instead walks the detected profiles, picking the one after whichever is
/// presently active.
pub fn select_profile(
    current: &Fingerprint,
    store: &ProfileStore,
    hints: &Hints,
    hooks: &dyn Hooks,
    live: &OutputSet,
) -> Option<String> {
    let active = active_profiles(live, store, &hints.skip_options);
    let block_env = block_env(&active);

    let unblocked = |profile: &Profile| {
        let is_blocked = hooks.blocked(&profile.path, &block_env);
        if is_blocked {
            debug!("Profile '{}' is blocked", profile.name);
        }
        !is_blocked
    };

    let detected: Vec<&Profile> = detected_profiles(current, store, hints.identity_mode)
        .into_iter()
        .filter(|p| unblocked(p))
        .collect();

    if hints.cycle {
        return cycle(&detected, &active);
    }

    match detected.as_slice() {
        [] => match &hints.default_profile {
            Some(name) => match store.get(name) {
                Some(profile) if unblocked(profile) => {
                    info!("No exact match, falling back to default '{}'", name);
                    Some(profile.name.clone())
                }
                _ => None,
            },
            None => {
                debug!("No profile matches the current fingerprint");
                None
            }
        },
        [only] => Some(only.name.clone()),
        [first, rest @ ..] => {
            info!(
                "Several profiles match ({} also detected), using '{}'",
                rest.iter()
                    .map(|p| p.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
                first.name
            );
            Some(first.name.clone())
        }
    }
}

/// Metadata for block scripts: which profile(s) the live configuration
/// already satisfies.
fn block_env(active: &[&Profile]) -> HookEnv {
    let names: Vec<&str> = active.iter().map(|p| p.name.as_str()).collect();
    [
        (
            "CURRENT_PROFILE".to_string(),
            names.first().copied().unwrap_or_default().to_string(),
        ),
        ("CURRENT_PROFILES".to_string(), names.join(":")),
    ]
    .into()
}

fn cycle(detected: &[&Profile], active: &[&Profile]) -> Option<String> {
    if detected.is_empty() {
        return None;
    }
    let position = detected
        .iter()
        .position(|p| active.iter().any(|a| a.name == p.name));
    let next = match position {
        Some(idx) => (idx + 1) % detected.len(),
        None => 0,
    };
    Some(detected[next].name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::NoHooks;
    use crate::output::{Mode, Output};
    use std::collections::BTreeMap;
    use std::path::{Path, PathBuf};

    struct BlockList(Vec<&'static str>);

    impl Hooks for BlockList {
        fn blocked(&self, profile_path: &Path, _env: &HookEnv) -> bool {
            self.0
                .iter()
                .any(|name| profile_path.file_name().unwrap().to_str() == Some(name))
        }

        fn run(&self, _profile_path: Option<&Path>, _name: &str, _env: &HookEnv) {}
    }

    fn connected(name: &str, edid: &str, mode: Mode) -> Output {
        let mut output = Output::new(name);
        output.connected = true;
        output.edid = Some(edid.to_string());
        output.mode = Some(mode);
        output.position = Some("0x0".parse().unwrap());
        output
    }

    fn live(outputs: Vec<Output>) -> OutputSet {
        outputs.into_iter().map(|o| (o.name.clone(), o)).collect()
    }

    fn profile(name: &str, setup: &[(&str, &str)], config: OutputSet) -> Profile {
        let entries: BTreeMap<String, String> = setup
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Profile {
            name: name.to_string(),
            setup: Fingerprint::from_entries(entries),
            config,
            path: PathBuf::from(format!("/profiles/{}", name)),
        }
    }

    fn mobile_and_docked() -> ProfileStore {
        ProfileStore::with_profiles(vec![
            profile(
                "mobile",
                &[("eDP-1", "aa")],
                live(vec![connected("eDP-1", "aa", Mode::new(1920, 1080))]),
            ),
            profile(
                "docked",
                &[("eDP-1", "aa"), ("HDMI-1", "bb")],
                live(vec![
                    connected("eDP-1", "aa", Mode::new(1920, 1080)),
                    connected("HDMI-1", "bb", Mode::new(2560, 1440)),
                ]),
            ),
        ])
    }

    fn fp(outputs: &OutputSet) -> Fingerprint {
        crate::fingerprint::fingerprint(outputs, false)
    }

    #[test]
    fn plugging_in_selects_the_larger_profile() {
        let store = mobile_and_docked();
        let hints = Hints::default();

        let laptop_only = live(vec![connected("eDP-1", "aa", Mode::new(1920, 1080))]);
        let selected = select_profile(&fp(&laptop_only), &store, &hints, &NoHooks, &laptop_only);
        assert_eq!(selected.as_deref(), Some("mobile"));

        let docked = live(vec![
            connected("eDP-1", "aa", Mode::new(1920, 1080)),
            connected("HDMI-1", "bb", Mode::new(2560, 1440)),
        ]);
        let selected = select_profile(&fp(&docked), &store, &hints, &NoHooks, &docked);
        assert_eq!(selected.as_deref(), Some("docked"));
    }

    #[test]
    fn blocked_profile_falls_through() {
        let store = mobile_and_docked();
        let hints = Hints::default();
        let docked = live(vec![
            connected("eDP-1", "aa", Mode::new(1920, 1080)),
            connected("HDMI-1", "bb", Mode::new(2560, 1440)),
        ]);
        let hooks = BlockList(vec!["docked"]);
        let selected = select_profile(&fp(&docked), &store, &hints, &hooks, &docked);
        assert_eq!(selected, None);
    }

    #[test]
    fn no_match_without_default_selects_nothing() {
        let store = mobile_and_docked();
        let hints = Hints::default();
        let unknown = live(vec![connected("DP-9", "zz", Mode::new(800, 600))]);
        assert_eq!(
            select_profile(&fp(&unknown), &store, &hints, &NoHooks, &unknown),
            None
        );
    }

    #[test]
    fn default_is_used_when_nothing_matches() {
        let store = mobile_and_docked();
        let hints = Hints {
            default_profile: Some("mobile".to_string()),
            ..Hints::default()
        };
        let unknown = live(vec![connected("DP-9", "zz", Mode::new(800, 600))]);
        assert_eq!(
            select_profile(&fp(&unknown), &store, &hints, &NoHooks, &unknown).as_deref(),
            Some("mobile")
        );
    }

    #[test]
    fn blocked_default_selects_nothing() {
        let store = mobile_and_docked();
        let hints = Hints {
            default_profile: Some("mobile".to_string()),
            ..Hints::default()
        };
        let unknown = live(vec![connected("DP-9", "zz", Mode::new(800, 600))]);
        let hooks = BlockList(vec!["mobile"]);
        assert_eq!(
            select_profile(&fp(&unknown), &store, &hints, &hooks, &unknown),
            None
        );
    }

    #[test]
    fn ambiguous_matches_resolve_by_name_order() {
        let config = live(vec![connected("eDP-1", "aa", Mode::new(1920, 1080))]);
        let store = ProfileStore::with_profiles(vec![
            profile("zz-copy", &[("eDP-1", "aa")], config.clone()),
            profile("aa-copy", &[("eDP-1", "aa")], config.clone()),
        ]);
        let selected = select_profile(&fp(&config), &store, &Hints::default(), &NoHooks, &config);
        assert_eq!(selected.as_deref(), Some("aa-copy"));
    }

    #[test]
    fn cycle_advances_past_the_active_profile() {
        let config = live(vec![connected("eDP-1", "aa", Mode::new(1920, 1080))]);
        let other = live(vec![{
            let mut o = connected("eDP-1", "aa", Mode::new(1280, 1024));
            o.position = Some("0x0".parse().unwrap());
            o
        }]);
        let store = ProfileStore::with_profiles(vec![
            profile("one", &[("eDP-1", "aa")], config.clone()),
            profile("two", &[("eDP-1", "aa")], other),
        ]);
        let hints = Hints {
            cycle: true,
            ..Hints::default()
        };

        // "one" is active, so cycling moves to "two".
        let selected = select_profile(&fp(&config), &store, &hints, &NoHooks, &config);
        assert_eq!(selected.as_deref(), Some("two"));
    }

    #[test]
    fn cycle_wraps_to_the_first_profile() {
        let config_one = live(vec![connected("eDP-1", "aa", Mode::new(1920, 1080))]);
        let config_two = live(vec![connected("eDP-1", "aa", Mode::new(1280, 1024))]);
        let store = ProfileStore::with_profiles(vec![
            profile("one", &[("eDP-1", "aa")], config_one.clone()),
            profile("two", &[("eDP-1", "aa")], config_two.clone()),
        ]);
        let hints = Hints {
            cycle: true,
            ..Hints::default()
        };

        // "two" (the last) is active, so cycling wraps back to "one".
        let selected = select_profile(&fp(&config_two), &store, &hints, &NoHooks, &config_two);
        assert_eq!(selected.as_deref(), Some("one"));
    }

    #[test]
    fn cycle_with_no_active_profile_starts_at_the_first() {
        let stored = live(vec![connected("eDP-1", "aa", Mode::new(1920, 1080))]);
        let store =
            ProfileStore::with_profiles(vec![profile("one", &[("eDP-1", "aa")], stored)]);
        let hints = Hints {
            cycle: true,
            ..Hints::default()
        };
        let current = live(vec![connected("eDP-1", "aa", Mode::new(800, 600))]);
        let selected = select_profile(&fp(&current), &store, &hints, &NoHooks, &current);
        assert_eq!(selected.as_deref(), Some("one"));
    }

    #[test]
    fn disconnecting_unrelated_output_keeps_the_match() {
        let store = mobile_and_docked();
        let hints = Hints::default();

        let mut with_spare = live(vec![connected("eDP-1", "aa", Mode::new(1920, 1080))]);
        with_spare.insert("DP-1".to_string(), Output::new("DP-1"));
        let selected =
            select_profile(&fp(&with_spare), &store, &hints, &NoHooks, &with_spare);
        assert_eq!(selected.as_deref(), Some("mobile"));
    }
}
