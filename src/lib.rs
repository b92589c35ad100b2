pub mod change;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod hooks;
pub mod matcher;
pub mod output;
pub mod profile;
pub mod virtual_profile;
pub mod watch;
pub mod xrandr;

pub use config::Settings;
pub use error::Error;
pub use fingerprint::{Fingerprint, IdentityMode};
pub use output::{Output, OutputSet};
pub use profile::ProfileStore;

use crate::hooks::{HookEnv, Hooks};
use crate::matcher::Hints;
use crate::output::enabled_outputs;
use crate::virtual_profile::Strategy;
use crate::xrandr::DisplayBackend;
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::{debug, info};

/// Resolved run options: command-line flags already merged over the
/// `settings.toml` defaults.
#[derive(Debug, Default)]
pub struct Options {
    pub default_profile: Option<String>,
    pub skip_options: BTreeSet<String>,
    pub match_edid: bool,
    pub ignore_lid: bool,
    pub force: bool,
    pub cycle: bool,
}

/// What a change run did.
#[derive(Debug, PartialEq, Eq)]
pub enum ChangeOutcome {
    Applied { profile: String },
    AlreadyCurrent { profile: String },
    NoMatch,
}

/// One profile's row in a listing.
#[derive(Debug, Serialize)]
pub struct ProfileInfo {
    pub name: String,
    pub outputs: Vec<String>,
    pub detected: bool,
    pub current: bool,
    pub blocked: bool,
}

pub struct Manager {
    backend: Box<dyn DisplayBackend>,
    hooks: Box<dyn Hooks>,
    store: ProfileStore,
    options: Options,
}

impl Manager {
    pub fn new(
        backend: Box<dyn DisplayBackend>,
        hooks: Box<dyn Hooks>,
        store: ProfileStore,
        options: Options,
    ) -> Self {
        Self {
            backend,
            hooks,
            store,
            options,
        }
    }

    fn identity_mode(&self) -> IdentityMode {
        if self.options.match_edid {
            IdentityMode::ByEdid
        } else {
            IdentityMode::ByName
        }
    }

    /// Query the live state, running the predetect hooks first so scripts
    /// can wake up sleeping outputs.
    pub fn query(&self) -> Result<OutputSet> {
        self.hooks.run(None, "predetect", &HookEnv::new());
        Ok(self.backend.query()?)
    }

    pub fn fingerprint(&self, outputs: &OutputSet) -> Fingerprint {
        fingerprint::fingerprint(outputs, !self.options.ignore_lid)
    }

    /// The `setup` file content for the current hardware.
    pub fn fingerprint_lines(&self, outputs: &OutputSet) -> Vec<String> {
        self.fingerprint(outputs).setup_lines()
    }

    /// The `config` file content for the current state.
    pub fn config_lines(&self, outputs: &OutputSet) -> Vec<String> {
        outputs
            .values()
            .flat_map(|o| o.config_lines())
            .collect()
    }

    /// Save the current configuration under `name` and run its postsave
    /// hooks.
    pub fn save(&mut self, name: &str) -> Result<()> {
        let outputs = self.query()?;
        let fingerprint = self.fingerprint(&outputs);
        let dir = self
            .store
            .save(name, &outputs, &fingerprint)
            .with_context(|| format!("failed to save profile '{}'", name))?;

        let env = hook_env(name, &dir, &outputs);
        self.hooks.run(Some(&dir), "postsave", &env);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<()> {
        Ok(self.store.remove(name)?)
    }

    /// Rows for `--list` and friends, most context included so the caller
    /// can filter and format.
    pub fn list(&self) -> Result<Vec<ProfileInfo>> {
        let outputs = self.query()?;
        let current_fp = self.fingerprint(&outputs);

        let detected: Vec<&str> =
            matcher::detected_profiles(&current_fp, &self.store, self.identity_mode())
                .iter()
                .map(|p| p.name.as_str())
                .collect();
        let active: Vec<&str> =
            matcher::active_profiles(&outputs, &self.store, &self.options.skip_options)
                .iter()
                .map(|p| p.name.as_str())
                .collect();
        let block_env = HookEnv::new();

        Ok(self
            .store
            .iter()
            .map(|profile| ProfileInfo {
                name: profile.name.clone(),
                outputs: profile.setup.entries().keys().cloned().collect(),
                detected: detected.contains(&profile.name.as_str()),
                current: active.contains(&profile.name.as_str()),
                blocked: self.hooks.blocked(&profile.path, &block_env),
            })
            .collect())
    }

    /// The full change flow: pick a target (an explicitly requested profile,
    /// a virtual layout, or the best match for the current hardware), then
    /// apply it unless the live configuration already satisfies it.
    pub fn change(&mut self, requested: Option<&str>) -> Result<ChangeOutcome> {
        let current = self.query()?;
        let current_fp = self.fingerprint(&current);

        let requested = requested.map(|name| self.store.resolve_alias(name).to_string());
        let chosen = match requested {
            Some(name) => name,
            None => {
                let hints = Hints {
                    default_profile: self.options.default_profile.clone(),
                    cycle: self.options.cycle,
                    identity_mode: self.identity_mode(),
                    skip_options: self.options.skip_options.clone(),
                };
                match matcher::select_profile(
                    &current_fp,
                    &self.store,
                    &hints,
                    self.hooks.as_ref(),
                    &current,
                ) {
                    Some(name) => name,
                    None => {
                        info!("No matching profile; leaving the configuration unchanged");
                        return Ok(ChangeOutcome::NoMatch);
                    }
                }
            }
        };

        let (mut target, scripts_dir) = self.target_for(&chosen, &current)?;
        pad_with_unused_outputs(&mut target, &current);

        if !self.options.force
            && !change::needs_change(&current, &target, &self.options.skip_options)
        {
            info!("Profile '{}' is already active", chosen);
            return Ok(ChangeOutcome::AlreadyCurrent { profile: chosen });
        }
        for line in change::diff(&current, &target, &self.options.skip_options) {
            debug!("{}", line);
        }

        drop_settled_outputs(&mut target, &current);

        let env = hook_env(&chosen, &scripts_dir, &target);
        self.hooks.run(Some(&scripts_dir), "preswitch", &env);
        self.backend
            .apply(&target, &current, &self.options.skip_options)
            .with_context(|| format!("failed to apply profile '{}'", chosen))?;
        self.hooks.run(Some(&scripts_dir), "postswitch", &env);

        info!("Applied profile '{}'", chosen);
        Ok(ChangeOutcome::Applied { profile: chosen })
    }

    /// Resolve a chosen name into its target configuration and the
    /// directory its hooks live in.
    fn target_for(&self, name: &str, current: &OutputSet) -> Result<(OutputSet, PathBuf)> {
        if let Some(strategy) = Strategy::from_name(name) {
            let target = virtual_profile::synthesize(strategy, current)?;
            // Hooks for virtual layouts may live in a directory of the same
            // name even though nothing is stored there.
            let dir = config::user_dir()
                .map(|d| d.join(name))
                .unwrap_or_else(|| PathBuf::from(name));
            return Ok((target, dir));
        }
        let profile = self
            .store
            .get(name)
            .ok_or_else(|| Error::ProfileNotFound(name.to_string()))?;
        Ok((profile.config.clone(), profile.path.clone()))
    }

    pub fn store(&self) -> &ProfileStore {
        &self.store
    }
}

/// Ensure every live connector appears in the target; unmentioned ones are
/// to be turned off.
fn pad_with_unused_outputs(target: &mut OutputSet, current: &OutputSet) {
    for (name, output) in current {
        if !target.contains_key(name) {
            target.insert(name.clone(), Output::off(name, output.edid.clone()));
        }
    }
}

/// Drop target entries that are off and already off, so the tool is not
/// asked to touch them at all.
fn drop_settled_outputs(target: &mut OutputSet, current: &OutputSet) {
    target.retain(|name, output| {
        output.is_active()
            || current
                .get(name)
                .map(Output::is_active)
                .unwrap_or(false)
    });
}

fn hook_env(profile: &str, dir: &std::path::Path, config: &OutputSet) -> HookEnv {
    [
        ("CURRENT_PROFILE".to_string(), profile.to_string()),
        (
            "PROFILE_FOLDER".to_string(),
            dir.to_string_lossy().into_owned(),
        ),
        (
            "MONITORS".to_string(),
            enabled_outputs(config).join(":"),
        ),
    ]
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::Mode;

    fn active(name: &str, mode: Mode) -> Output {
        let mut output = Output::new(name);
        output.connected = true;
        output.edid = Some(format!("edid-{}", name));
        output.mode = Some(mode);
        output.position = Some("0x0".parse().unwrap());
        output
    }

    #[test]
    fn padding_adds_missing_outputs_as_off() {
        let current: OutputSet = [
            active("eDP-1", Mode::new(1920, 1080)),
            Output::new("HDMI-1"),
        ]
        .into_iter()
        .map(|o| (o.name.clone(), o))
        .collect();
        let mut target: OutputSet = [active("eDP-1", Mode::new(1920, 1080))]
            .into_iter()
            .map(|o| (o.name.clone(), o))
            .collect();

        pad_with_unused_outputs(&mut target, &current);
        assert_eq!(target.len(), 2);
        assert!(!target["HDMI-1"].is_active());
    }

    #[test]
    fn settled_outputs_are_not_touched() {
        let current: OutputSet = [(
            "HDMI-1".to_string(),
            Output::new("HDMI-1"),
        )]
        .into();
        let mut target: OutputSet = [(
            "HDMI-1".to_string(),
            Output::off("HDMI-1", None),
        )]
        .into();

        drop_settled_outputs(&mut target, &current);
        assert!(target.is_empty());
    }
}
