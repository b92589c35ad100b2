use serde::Deserialize;
use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Directory name used under every config root.
pub const APP_DIR: &str = "randr-manager";

const SETTINGS_FILE: &str = "settings.toml";

/// Defaults from `settings.toml`, merged beneath the command line: a flag
/// given on the command line always wins over these.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub default_profile: Option<String>,
    pub skip_options: Vec<String>,
    pub match_edid: bool,
    pub ignore_lid: bool,
    /// Additional profile roots, searched before the user directory.
    /// `~` is expanded.
    pub extra_profile_dirs: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSettings {
    default_profile: Option<String>,
    skip_options: Option<Vec<String>>,
    match_edid: Option<bool>,
    ignore_lid: Option<bool>,
    extra_profile_dirs: Option<Vec<String>>,
}

impl Settings {
    /// Read `settings.toml` from each root in order; later roots override
    /// the fields they set, so the user directory (passed last) is
    /// authoritative. A malformed file is warned about and skipped.
    pub fn load(roots: &[PathBuf]) -> Self {
        let mut settings = Self::default();
        for root in roots {
            let path = root.join(SETTINGS_FILE);
            let Ok(content) = fs::read_to_string(&path) else {
                continue;
            };
            match toml::from_str::<RawSettings>(&content) {
                Ok(raw) => {
                    debug!("Loaded settings from {:?}", path);
                    settings.overlay(raw);
                }
                Err(e) => {
                    warn!("Ignoring malformed settings file {:?}: {}", path, e);
                }
            }
        }
        settings
    }

    fn overlay(&mut self, raw: RawSettings) {
        if raw.default_profile.is_some() {
            self.default_profile = raw.default_profile;
        }
        if let Some(skip) = raw.skip_options {
            self.skip_options = skip;
        }
        if let Some(match_edid) = raw.match_edid {
            self.match_edid = match_edid;
        }
        if let Some(ignore_lid) = raw.ignore_lid {
            self.ignore_lid = ignore_lid;
        }
        if let Some(dirs) = raw.extra_profile_dirs {
            self.extra_profile_dirs = dirs;
        }
    }
}

/// Normalize a skip-option list: strip any `--` the user typed and drop
/// empty entries.
pub fn normalize_skip_options<I, S>(options: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    options
        .into_iter()
        .flat_map(|s| {
            s.as_ref()
                .split(',')
                .map(|part| part.trim().trim_start_matches("--").to_string())
                .collect::<Vec<_>>()
        })
        .filter(|s| !s.is_empty())
        .collect()
}

/// The user's own profile directory, where saves land.
pub fn user_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join(APP_DIR))
}

fn xdg_config_dirs() -> Vec<PathBuf> {
    let raw = env::var("XDG_CONFIG_DIRS").unwrap_or_else(|_| "/etc/xdg".to_string());
    raw.split(':')
        .filter(|dir| !dir.is_empty())
        .map(|dir| Path::new(dir).join(APP_DIR))
        .collect()
}

/// Profile roots in load order: lowest priority first, the user directory
/// last. XDG lists config dirs most-important-first, hence the reversal.
pub fn profile_roots(settings: &Settings) -> Vec<PathBuf> {
    let mut roots: Vec<PathBuf> = xdg_config_dirs().into_iter().rev().collect();
    for dir in &settings.extra_profile_dirs {
        roots.push(PathBuf::from(shellexpand::tilde(dir).into_owned()));
    }
    if let Some(user) = user_dir() {
        roots.push(user);
    }
    roots
}

/// Directories searched for global hook scripts, most important first: the
/// user directory shadows the system ones.
pub fn hook_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(user) = user_dir() {
        dirs.push(user);
    }
    dirs.extend(xdg_config_dirs());
    dirs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_roots_override_earlier_ones() {
        let system = tempfile::tempdir().unwrap();
        let user = tempfile::tempdir().unwrap();
        fs::write(
            system.path().join(SETTINGS_FILE),
            "default_profile = \"docked\"\nmatch_edid = true\n",
        )
        .unwrap();
        fs::write(
            user.path().join(SETTINGS_FILE),
            "default_profile = \"mobile\"\n",
        )
        .unwrap();

        let settings = Settings::load(&[
            system.path().to_path_buf(),
            user.path().to_path_buf(),
        ]);
        assert_eq!(settings.default_profile.as_deref(), Some("mobile"));
        // Untouched by the user file, so the system value survives.
        assert!(settings.match_edid);
    }

    #[test]
    fn malformed_settings_are_skipped() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join(SETTINGS_FILE), "default_profile = [1\n").unwrap();
        let settings = Settings::load(&[root.path().to_path_buf()]);
        assert_eq!(settings.default_profile, None);
    }

    #[test]
    fn skip_options_are_normalized() {
        let skip = normalize_skip_options(["--gamma, rate", "", "pos"]);
        assert_eq!(
            skip.into_iter().collect::<Vec<_>>(),
            vec!["gamma", "pos", "rate"]
        );
    }
}
