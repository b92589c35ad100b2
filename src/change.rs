use crate::output::{Output, OutputSet};
use std::collections::BTreeSet;

/// Decide whether applying `target` over `current` would change anything.
/// Option names in `ignored` are excluded from the comparison on both sides;
/// they may name typed fields (`mode`, `rate`, `pos`, `rotate`, `reflect`,
/// `primary`) as well as extra options.
pub fn needs_change(
    current: &OutputSet,
    target: &OutputSet,
    ignored: &BTreeSet<String>,
) -> bool {
    !diff(current, target, ignored).is_empty()
}

/// The human-readable differences between the live and the target
/// configuration, empty when applying would be a no-op. An output absent
/// from the target is expected to be off.
pub fn diff(current: &OutputSet, target: &OutputSet, ignored: &BTreeSet<String>) -> Vec<String> {
    let names: BTreeSet<&String> = current.keys().chain(target.keys()).collect();
    let mut differences = Vec::new();

    for name in names {
        let cur = current.get(name.as_str());
        let tgt = target.get(name.as_str());

        let cur_active = cur.map(Output::is_active).unwrap_or(false);
        let tgt_active = tgt.map(Output::is_active).unwrap_or(false);

        match (cur, tgt) {
            (Some(cur), Some(tgt)) if cur_active && tgt_active => {
                diff_active(cur, tgt, ignored, &mut differences);
            }
            _ if cur_active && !tgt_active => {
                differences.push(format!("output {} is active but should be off", name));
            }
            _ if !cur_active && tgt_active => {
                differences.push(format!("output {} is off but should be active", name));
            }
            _ => {}
        }
    }
    differences
}

fn diff_active(
    cur: &Output,
    tgt: &Output,
    ignored: &BTreeSet<String>,
    differences: &mut Vec<String>,
) {
    let name = &cur.name;
    if !ignored.contains("mode") && cur.mode != tgt.mode {
        differences.push(format!(
            "output {}: mode {} should be {}",
            name,
            display_or(cur.mode.as_ref(), "unset"),
            display_or(tgt.mode.as_ref(), "unset"),
        ));
    }
    if !ignored.contains("rate") && cur.rate != tgt.rate {
        differences.push(format!(
            "output {}: rate {} should be {}",
            name,
            cur.rate.as_deref().unwrap_or("unset"),
            tgt.rate.as_deref().unwrap_or("unset"),
        ));
    }
    if !ignored.contains("pos") && cur.position != tgt.position {
        differences.push(format!(
            "output {}: position {} should be {}",
            name,
            display_or(cur.position.as_ref(), "unset"),
            display_or(tgt.position.as_ref(), "unset"),
        ));
    }
    if !ignored.contains("rotate") && cur.rotation != tgt.rotation {
        differences.push(format!(
            "output {}: rotation {} should be {}",
            name,
            cur.rotation.as_str(),
            tgt.rotation.as_str()
        ));
    }
    if !ignored.contains("reflect") && cur.reflection != tgt.reflection {
        differences.push(format!(
            "output {}: reflection {} should be {}",
            name,
            cur.reflection.as_str(),
            tgt.reflection.as_str()
        ));
    }
    if !ignored.contains("primary") && cur.primary != tgt.primary {
        differences.push(format!(
            "output {}: primary {} should be {}",
            name, cur.primary, tgt.primary
        ));
    }

    let keys: BTreeSet<&String> = cur
        .extra_options
        .keys()
        .chain(tgt.extra_options.keys())
        .filter(|key| !ignored.contains(*key))
        .collect();
    for key in keys {
        let cur_value = cur.extra_options.get(key.as_str());
        let tgt_value = tgt.extra_options.get(key.as_str());
        if cur_value != tgt_value {
            differences.push(format!(
                "output {}: {} {} should be {}",
                name,
                key,
                cur_value.map(String::as_str).unwrap_or("unset"),
                tgt_value.map(String::as_str).unwrap_or("unset"),
            ));
        }
    }
}

fn display_or<T: std::fmt::Display>(value: Option<&T>, fallback: &str) -> String {
    value
        .map(|v| v.to_string())
        .unwrap_or_else(|| fallback.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::Mode;
    use std::collections::BTreeMap;

    fn active(name: &str, mode: Mode, extras: &[(&str, &str)]) -> Output {
        let mut output = Output::new(name);
        output.connected = true;
        output.mode = Some(mode);
        output.position = Some("0x0".parse().unwrap());
        output.extra_options = extras
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        output
    }

    fn set(outputs: Vec<Output>) -> OutputSet {
        outputs.into_iter().map(|o| (o.name.clone(), o)).collect()
    }

    fn no_skips() -> BTreeSet<String> {
        BTreeSet::new()
    }

    #[test]
    fn identical_configurations_need_no_change() {
        let config = set(vec![
            active("eDP-1", Mode::new(1920, 1080), &[("gamma", "1.1:1.0:0.9")]),
            Output::new("HDMI-1"),
        ]);
        assert!(!needs_change(&config, &config.clone(), &no_skips()));
    }

    #[test]
    fn absent_from_target_means_should_be_off() {
        let current = set(vec![active("HDMI-1", Mode::new(1920, 1080), &[])]);
        let target = OutputSet::new();
        assert!(needs_change(&current, &target, &no_skips()));

        let current_off = set(vec![Output::new("HDMI-1")]);
        assert!(!needs_change(&current_off, &target, &no_skips()));
    }

    #[test]
    fn mode_difference_is_detected() {
        let current = set(vec![active("eDP-1", Mode::new(1920, 1080), &[])]);
        let target = set(vec![active("eDP-1", Mode::new(1280, 1024), &[])]);
        assert!(needs_change(&current, &target, &no_skips()));
    }

    #[test]
    fn skipped_options_are_invisible_to_the_diff() {
        let current = set(vec![active(
            "eDP-1",
            Mode::new(1920, 1080),
            &[("gamma", "1.0:1.0:1.0")],
        )]);
        let target = set(vec![active(
            "eDP-1",
            Mode::new(1920, 1080),
            &[("gamma", "0.9:0.9:0.9")],
        )]);
        assert!(needs_change(&current, &target, &no_skips()));

        let skip: BTreeSet<String> = ["gamma".to_string()].into();
        assert!(!needs_change(&current, &target, &skip));
    }

    #[test]
    fn typed_fields_can_be_skipped_too() {
        let current = set(vec![active("eDP-1", Mode::new(1920, 1080), &[])]);
        let mut rotated = active("eDP-1", Mode::new(1920, 1080), &[]);
        rotated.rotation = "left".parse().unwrap();
        let target = set(vec![rotated]);

        let skip: BTreeSet<String> = ["rotate".to_string()].into();
        assert!(needs_change(&current, &target, &no_skips()));
        assert!(!needs_change(&current, &target, &skip));
    }

    #[test]
    fn option_present_on_one_side_only_is_a_difference() {
        let current = set(vec![active("eDP-1", Mode::new(1920, 1080), &[])]);
        let target = set(vec![active(
            "eDP-1",
            Mode::new(1920, 1080),
            &[("panning", "3840x1080+0+0")],
        )]);
        let differences = diff(&current, &target, &no_skips());
        assert_eq!(differences.len(), 1);
        assert!(differences[0].contains("panning"));
    }

    #[test]
    fn extra_outputs_in_current_must_turn_off() {
        let current = set(vec![
            active("eDP-1", Mode::new(1920, 1080), &[]),
            active("HDMI-1", Mode::new(1280, 1024), &[]),
        ]);
        let target = set(vec![active("eDP-1", Mode::new(1920, 1080), &[])]);
        let differences = diff(&current, &target, &no_skips());
        assert_eq!(differences.len(), 1);
        assert!(differences[0].contains("HDMI-1"));
    }
}
