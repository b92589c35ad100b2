use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;
use crate::output::{Output, OutputSet};
use crate::virtual_profile;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A saved profile: the fingerprint captured at save time plus the target
/// configuration to realize when it is chosen.
#[derive(Debug, Clone)]
pub struct Profile {
    pub name: String,
    pub setup: Fingerprint,
    pub config: OutputSet,
    /// Directory the profile was loaded from; hooks live here.
    pub path: PathBuf,
}

/// All stored profiles, loaded in full before any matching decision and kept
/// in name order so every ranking over them is deterministic.
#[derive(Debug, Default)]
pub struct ProfileStore {
    profiles: BTreeMap<String, Profile>,
    aliases: BTreeMap<String, String>,
    save_root: Option<PathBuf>,
}

impl ProfileStore {
    /// Load profiles from an ordered list of root directories. Roots are
    /// consumed first to last with last-writer-wins on name collision, so the
    /// caller passes them lowest priority first; the final root is the user
    /// directory and receives saves.
    pub fn load(roots: &[PathBuf]) -> Self {
        let mut store = Self {
            save_root: roots.last().cloned(),
            ..Self::default()
        };
        for root in roots {
            store.load_root(root);
        }
        store
    }

    fn load_root(&mut self, root: &Path) {
        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(_) => return,
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(String::from)
            else {
                continue;
            };

            if path.is_symlink() {
                if let Ok(target) = fs::read_link(&path) {
                    if let Some(target) = target.file_name().and_then(|n| n.to_str()) {
                        self.aliases.insert(name, target.to_string());
                    }
                }
                continue;
            }
            if !path.is_dir() {
                continue;
            }

            let config_path = path.join("config");
            let setup_path = path.join("setup");
            if !config_path.is_file() || !setup_path.is_file() {
                continue;
            }

            match load_profile(&name, &path) {
                Ok(profile) => {
                    debug!("Loaded profile '{}' from {:?}", name, root);
                    self.profiles.insert(name, profile);
                }
                Err(e) => {
                    warn!("Skipping profile '{}': {}", name, e);
                }
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Profile> {
        self.profiles.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.profiles.contains_key(name)
    }

    /// Profiles in stable name order.
    pub fn iter(&self) -> impl Iterator<Item = &Profile> {
        self.profiles.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Follow a symlink alias to its target profile name, if `name` is one.
    pub fn resolve_alias<'a>(&'a self, name: &'a str) -> &'a str {
        match self.aliases.get(name) {
            Some(target)
                if self.profiles.contains_key(target)
                    || virtual_profile::is_reserved(target) =>
            {
                target
            }
            _ => name,
        }
    }

    /// Capture the given configuration under `name`. Both files are written
    /// to temporary names first and renamed, so a failure leaves either the
    /// previous profile or nothing.
    pub fn save(
        &mut self,
        name: &str,
        outputs: &OutputSet,
        fingerprint: &Fingerprint,
    ) -> Result<PathBuf> {
        validate_name(name)?;
        let root = self.save_root.clone().ok_or(Error::NoSaveRoot)?;
        let dir = root.join(name);
        fs::create_dir_all(&dir)?;

        let mut config_text = String::new();
        for output in outputs.values() {
            let mut output = output.clone();
            output.strip_default_options();
            for line in output.config_lines() {
                config_text.push_str(&line);
                config_text.push('\n');
            }
        }
        let mut setup_text = String::new();
        for line in fingerprint.setup_lines() {
            setup_text.push_str(&line);
            setup_text.push('\n');
        }

        write_atomically(&dir.join("config"), &config_text)?;
        write_atomically(&dir.join("setup"), &setup_text)?;

        let profile = load_profile(name, &dir)?;
        self.profiles.insert(name.to_string(), profile);
        info!("Saved profile '{}' to {:?}", name, dir);
        Ok(dir)
    }

    /// Delete a stored profile. Only profiles in the user directory can be
    /// removed; system-wide definitions are read-only from here.
    pub fn remove(&mut self, name: &str) -> Result<()> {
        validate_name(name)?;
        if !self.profiles.contains_key(name) {
            return Err(Error::ProfileNotFound(name.to_string()));
        }
        let root = self.save_root.clone().ok_or(Error::NoSaveRoot)?;
        let dir = root.join(name);
        if !dir.is_dir() {
            return Err(Error::SystemProfile(name.to_string()));
        }
        fs::remove_dir_all(&dir)?;
        self.profiles.remove(name);
        info!("Removed profile '{}'", name);
        Ok(())
    }
}

#[cfg(test)]
impl ProfileStore {
    /// Build a store directly from in-memory profiles.
    pub fn with_profiles(profiles: Vec<Profile>) -> Self {
        Self {
            profiles: profiles
                .into_iter()
                .map(|p| (p.name.clone(), p))
                .collect(),
            aliases: BTreeMap::new(),
            save_root: None,
        }
    }
}

fn validate_name(name: &str) -> Result<()> {
    if virtual_profile::is_reserved(name) {
        return Err(Error::ReservedName(name.to_string()));
    }
    if name.is_empty() || name.contains('/') || name == "." || name == ".." {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(())
}

fn write_atomically(path: &Path, content: &str) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, content)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn load_profile(name: &str, dir: &Path) -> Result<Profile> {
    let setup_path = dir.join("setup");
    let setup_text = fs::read_to_string(&setup_path)?;
    let setup = parse_setup(&setup_text).map_err(|reason| Error::ProfileParse {
        path: setup_path,
        reason,
    })?;

    let config_path = dir.join("config");
    let config_text = fs::read_to_string(&config_path)?;
    let config = parse_config(&config_text, &setup).map_err(|reason| Error::ProfileParse {
        path: config_path,
        reason,
    })?;

    Ok(Profile {
        name: name.to_string(),
        setup: Fingerprint::from_entries(setup),
        config,
        path: dir.to_path_buf(),
    })
}

/// Parse a `setup` file: `<output-name> <identity-token>` per line.
pub fn parse_setup(text: &str) -> std::result::Result<BTreeMap<String, String>, String> {
    let mut entries = BTreeMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split_whitespace();
        match (fields.next(), fields.next()) {
            (Some(name), Some(token)) => {
                entries.insert(name.to_string(), token.to_string());
            }
            _ => return Err(format!("malformed setup line '{}'", line)),
        }
    }
    Ok(entries)
}

/// Parse a `config` file into the target output set. Outputs that are off
/// and not named in the setup are dropped: they were merely disconnected at
/// save time and say nothing about this profile's intent.
pub fn parse_config(
    text: &str,
    setup: &BTreeMap<String, String>,
) -> std::result::Result<OutputSet, String> {
    let mut config = OutputSet::new();
    let mut current: Option<Output> = None;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, value) = match line.split_once(char::is_whitespace) {
            Some((key, value)) => (key, value.trim()),
            None => (line, ""),
        };

        if key == "output" {
            if value.is_empty() {
                return Err("output line without a name".to_string());
            }
            if let Some(done) = current.take() {
                config.insert(done.name.clone(), done);
            }
            let mut output = Output::new(value);
            output.edid = setup.get(value).cloned();
            output.connected = output.edid.is_some();
            current = Some(output);
            continue;
        }

        let output = current
            .as_mut()
            .ok_or_else(|| format!("'{}' before any output line", line))?;
        match key {
            "off" => output.mode = None,
            "mode" => output.mode = Some(value.parse()?),
            "rate" => output.rate = Some(value.to_string()),
            "pos" => output.position = Some(value.parse()?),
            "rotate" => output.rotation = value.parse()?,
            "reflect" => output.reflection = value.parse()?,
            "primary" => output.primary = true,
            _ => {
                output
                    .extra_options
                    .insert(key.to_string(), value.to_string());
            }
        }
    }
    if let Some(done) = current.take() {
        config.insert(done.name.clone(), done);
    }

    for output in config.values() {
        if output.is_active() && !setup.contains_key(&output.name) {
            return Err(format!(
                "output '{}' is active in config but missing from setup",
                output.name
            ));
        }
    }
    config.retain(|name, output| output.is_active() || setup.contains_key(name));

    Ok(config)
}
