use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, warn};

/// Metadata handed to hook scripts, exported as `RANDR_MANAGER_<KEY>`
/// environment variables.
pub type HookEnv = BTreeMap<String, String>;

const ENV_PREFIX: &str = "RANDR_MANAGER_";

/// Seam between the selection logic and user scripts. The matcher only ever
/// consults `blocked`; the surrounding flows sequence the other hooks.
pub trait Hooks {
    /// True iff a `block` script for this profile exits with status 0.
    /// A script that cannot be run at all does not block: a broken script
    /// must not permanently disable a profile.
    fn blocked(&self, profile_path: &Path, env: &HookEnv) -> bool;

    /// Run the named hook (predetect, preswitch, postswitch, postsave) for
    /// its side effects; exit codes are logged and otherwise ignored.
    fn run(&self, profile_path: Option<&Path>, name: &str, env: &HookEnv);
}

/// Executes hook scripts from the user directory, the system config
/// directories and the profile directory, in that order. For a plain script
/// name only the first candidate found runs; inside `<name>.d` directories
/// every executable runs, shadowed per file name across directories.
pub struct ScriptRunner {
    global_dirs: Vec<PathBuf>,
}

impl ScriptRunner {
    pub fn new(global_dirs: Vec<PathBuf>) -> Self {
        Self { global_dirs }
    }

    /// Returns true iff any executed script exited with status 0.
    fn exec_scripts(&self, profile_path: Option<&Path>, name: &str, env: &HookEnv) -> bool {
        let mut candidates: Vec<&Path> = self.global_dirs.iter().map(PathBuf::as_path).collect();
        if let Some(path) = profile_path {
            candidates.push(path);
        }

        let mut ran: HashSet<String> = HashSet::new();
        let mut any_zero = false;

        for dir in candidates {
            if !ran.contains(name) {
                let script = dir.join(name);
                if is_executable(&script) {
                    any_zero |= run_script(&script, env) == Some(0);
                    ran.insert(name.to_string());
                }
            }

            let script_dir = dir.join(format!("{}.d", name));
            let Ok(entries) = fs::read_dir(&script_dir) else {
                continue;
            };
            let mut scripts: Vec<PathBuf> = entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| is_executable(p))
                .collect();
            scripts.sort();
            for script in scripts {
                let Some(file_name) = script.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                let shadow_key = format!("d/{}", file_name);
                if ran.contains(&shadow_key) {
                    continue;
                }
                any_zero |= run_script(&script, env) == Some(0);
                ran.insert(shadow_key);
            }
        }
        any_zero
    }
}

impl Hooks for ScriptRunner {
    fn blocked(&self, profile_path: &Path, env: &HookEnv) -> bool {
        self.exec_scripts(Some(profile_path), "block", env)
    }

    fn run(&self, profile_path: Option<&Path>, name: &str, env: &HookEnv) {
        self.exec_scripts(profile_path, name, env);
    }
}

/// Hook runner that runs nothing and blocks nothing.
pub struct NoHooks;

impl Hooks for NoHooks {
    fn blocked(&self, _profile_path: &Path, _env: &HookEnv) -> bool {
        false
    }

    fn run(&self, _profile_path: Option<&Path>, _name: &str, _env: &HookEnv) {}
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.is_file()
        && fs::metadata(path)
            .map(|m| m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
}

fn run_script(script: &Path, env: &HookEnv) -> Option<i32> {
    let mut command = Command::new(script);
    for (key, value) in env {
        command.env(format!("{}{}", ENV_PREFIX, key), value);
    }
    match command.status() {
        Ok(status) => {
            debug!("Hook {:?} exited with {:?}", script, status.code());
            status.code()
        }
        Err(e) => {
            warn!("Failed to execute hook {:?}: {}", script, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    fn write_script(dir: &Path, name: &str, exit_code: i32) -> PathBuf {
        let path = dir.join(name);
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh\nexit {}", exit_code).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn block_script_exiting_zero_blocks() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "block", 0);
        let runner = ScriptRunner::new(vec![]);
        assert!(runner.blocked(dir.path(), &HookEnv::new()));
    }

    #[test]
    fn block_script_exiting_nonzero_does_not_block() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "block", 1);
        let runner = ScriptRunner::new(vec![]);
        assert!(!runner.blocked(dir.path(), &HookEnv::new()));
    }

    #[test]
    fn missing_or_broken_block_script_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptRunner::new(vec![]);
        assert!(!runner.blocked(dir.path(), &HookEnv::new()));

        // Present but not executable: never run, never blocks.
        fs::write(dir.path().join("block"), "#!/bin/sh\nexit 0\n").unwrap();
        assert!(!runner.blocked(dir.path(), &HookEnv::new()));
    }

    #[test]
    fn global_script_shadows_profile_script() {
        let global = tempfile::tempdir().unwrap();
        let profile = tempfile::tempdir().unwrap();
        write_script(global.path(), "block", 1);
        write_script(profile.path(), "block", 0);

        let runner = ScriptRunner::new(vec![global.path().to_path_buf()]);
        // The global block ran (exit 1) and shadowed the profile's exit-0.
        assert!(!runner.blocked(profile.path(), &HookEnv::new()));
    }

    #[test]
    fn dot_d_scripts_run_alongside_the_plain_script() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "block", 1);
        fs::create_dir(dir.path().join("block.d")).unwrap();
        write_script(&dir.path().join("block.d"), "10-check", 0);

        let runner = ScriptRunner::new(vec![]);
        assert!(runner.blocked(dir.path(), &HookEnv::new()));
    }

    #[test]
    fn hook_environment_is_exported_with_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("seen");
        let script = dir.path().join("postswitch");
        let mut file = fs::File::create(&script).unwrap();
        writeln!(
            file,
            "#!/bin/sh\nprintf '%s' \"$RANDR_MANAGER_CURRENT_PROFILE\" > {}",
            marker.display()
        )
        .unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let runner = ScriptRunner::new(vec![]);
        let env: HookEnv = [("CURRENT_PROFILE".to_string(), "docked".to_string())].into();
        runner.run(Some(dir.path()), "postswitch", &env);
        assert_eq!(fs::read_to_string(marker).unwrap(), "docked");
    }
}
