use crate::error::{Error, Result};
use crate::output::{Mode, ModeInfo, Output, OutputSet, Position};
use std::collections::BTreeSet;

/// The built-in layout strategies. These names are reserved: they can never
/// be saved or removed, and they bypass the store entirely when requested.
pub const RESERVED: &[(&str, &str)] = &[
    ("off", "Disable all outputs"),
    ("common", "Mirror all connected outputs at the largest common resolution"),
    (
        "clone-largest",
        "Mirror all connected outputs at the largest native resolution",
    ),
    (
        "horizontal",
        "Place all connected outputs left to right at their native resolution",
    ),
    (
        "vertical",
        "Stack all connected outputs top to bottom at their native resolution",
    ),
];

pub fn is_reserved(name: &str) -> bool {
    RESERVED.iter().any(|(reserved, _)| *reserved == name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Off,
    Common,
    CloneLargest,
    Horizontal,
    Vertical,
}

impl Strategy {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "off" => Some(Strategy::Off),
            "common" => Some(Strategy::Common),
            "clone-largest" => Some(Strategy::CloneLargest),
            "horizontal" => Some(Strategy::Horizontal),
            "vertical" => Some(Strategy::Vertical),
            _ => None,
        }
    }
}

/// Compute the target configuration for a built-in strategy from the queried
/// outputs. Pure: the same input set always yields the same layout, with
/// outputs placed in name order. Disconnected outputs are turned off in
/// every strategy.
pub fn synthesize(strategy: Strategy, outputs: &OutputSet) -> Result<OutputSet> {
    let mut target = OutputSet::new();
    for output in outputs.values() {
        target.insert(
            output.name.clone(),
            Output::off(&output.name, output.edid.clone()),
        );
    }

    match strategy {
        Strategy::Off => {}
        Strategy::Horizontal => place_in_row(outputs, &mut target, true),
        Strategy::Vertical => place_in_row(outputs, &mut target, false),
        Strategy::Common => mirror_at_common(outputs, &mut target)?,
        Strategy::CloneLargest => clone_largest(outputs, &mut target)?,
    }
    Ok(target)
}

/// The mode an output should run at when nothing else constrains it: the
/// preferred mode when one is reported, else the largest by area.
fn best_mode(output: &Output) -> Option<&ModeInfo> {
    if let Some(preferred) = output.modes.iter().find(|m| m.preferred) {
        return Some(preferred);
    }
    let mut best: Option<&ModeInfo> = None;
    for mode in &output.modes {
        if best.map(|b| mode.area() > b.area()).unwrap_or(true) {
            best = Some(mode);
        }
    }
    best
}

fn connected<'a>(outputs: &'a OutputSet) -> impl Iterator<Item = &'a Output> {
    outputs.values().filter(|o| o.connected)
}

fn place_in_row(outputs: &OutputSet, target: &mut OutputSet, horizontal: bool) {
    let mut shift: i32 = 0;
    for output in connected(outputs) {
        let Some(mode) = best_mode(output) else {
            continue;
        };
        if let Some(entry) = target.get_mut(&output.name) {
            entry.mode = Some(mode.resolution());
            entry.rate = Some(mode.rate.clone());
            entry.position = Some(if horizontal {
                Position { x: shift, y: 0 }
            } else {
                Position { x: 0, y: shift }
            });
        }
        shift += if horizontal {
            mode.width as i32
        } else {
            mode.height as i32
        };
    }
}

fn mirror_at_common(outputs: &OutputSet, target: &mut OutputSet) -> Result<()> {
    let mut intersection: Option<BTreeSet<(u32, u32)>> = None;
    for output in connected(outputs) {
        let resolutions: BTreeSet<(u32, u32)> =
            output.modes.iter().map(|m| (m.width, m.height)).collect();
        intersection = Some(match intersection {
            None => resolutions,
            Some(prev) => prev.intersection(&resolutions).copied().collect(),
        });
    }
    let Some(intersection) = intersection else {
        return Err(Error::NoConnectedOutputs);
    };

    let (width, height) = intersection
        .into_iter()
        .max_by_key(|(w, h)| (*w as u64 * *h as u64, *w, *h))
        .ok_or(Error::NoCommonMode)?;

    for output in connected(outputs) {
        let rate = rate_for(output, width, height);
        if let Some(entry) = target.get_mut(&output.name) {
            entry.mode = Some(Mode::new(width, height));
            entry.rate = rate;
            entry.position = Some(Position { x: 0, y: 0 });
        }
    }
    Ok(())
}

fn clone_largest(outputs: &OutputSet, target: &mut OutputSet) -> Result<()> {
    let reference = connected(outputs)
        .filter_map(best_mode)
        .fold(None::<&ModeInfo>, |best, mode| match best {
            Some(b) if mode.area() <= b.area() => Some(b),
            _ => Some(mode),
        })
        .ok_or(Error::NoConnectedOutputs)?;
    let (width, height) = (reference.width, reference.height);

    for output in connected(outputs) {
        let rate = rate_for(output, width, height);
        if let Some(entry) = target.get_mut(&output.name) {
            entry.mode = Some(Mode::new(width, height));
            entry.rate = rate;
            entry.position = Some(Position { x: 0, y: 0 });
        }
    }
    Ok(())
}

/// The rate to request alongside a resolution: the output's preferred mode
/// at that resolution if it has one, else the first it reports. None if the
/// output does not support the resolution at all (scaling is the display
/// tool's business then).
fn rate_for(output: &Output, width: u32, height: u32) -> Option<String> {
    let mut candidates = output
        .modes
        .iter()
        .filter(|m| m.width == width && m.height == height);
    let first = candidates.next()?;
    Some(
        std::iter::once(first)
            .chain(candidates)
            .find(|m| m.preferred)
            .unwrap_or(first)
            .rate
            .clone(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_modes(name: &str, modes: &[(u32, u32, &str, bool)]) -> Output {
        let mut output = Output::new(name);
        output.connected = true;
        output.edid = Some(format!("edid-{}", name));
        output.modes = modes
            .iter()
            .map(|(w, h, rate, preferred)| ModeInfo {
                width: *w,
                height: *h,
                rate: rate.to_string(),
                preferred: *preferred,
                current: false,
            })
            .collect();
        output
    }

    fn set(outputs: Vec<Output>) -> OutputSet {
        outputs.into_iter().map(|o| (o.name.clone(), o)).collect()
    }

    #[test]
    fn off_disables_everything() {
        let outputs = set(vec![
            with_modes("eDP-1", &[(1920, 1080, "60.00", true)]),
            Output::new("HDMI-1"),
        ]);
        let target = synthesize(Strategy::Off, &outputs).unwrap();
        assert!(target.values().all(|o| o.mode.is_none()));
        assert_eq!(target.len(), 2);
    }

    #[test]
    fn horizontal_places_left_to_right_by_name() {
        let outputs = set(vec![
            with_modes("A", &[(1920, 1080, "60.00", true)]),
            with_modes("B", &[(1280, 1024, "75.00", true)]),
            Output::new("C"),
        ]);
        let target = synthesize(Strategy::Horizontal, &outputs).unwrap();
        assert_eq!(target["A"].position.unwrap().to_string(), "0x0");
        assert_eq!(target["B"].position.unwrap().to_string(), "1920x0");
        assert_eq!(target["B"].mode, Some(Mode::new(1280, 1024)));
        assert!(target["C"].mode.is_none());
    }

    #[test]
    fn vertical_stacks_by_cumulative_height() {
        let outputs = set(vec![
            with_modes("A", &[(1920, 1080, "60.00", true)]),
            with_modes("B", &[(1280, 1024, "75.00", true)]),
        ]);
        let target = synthesize(Strategy::Vertical, &outputs).unwrap();
        assert_eq!(target["A"].position.unwrap().to_string(), "0x0");
        assert_eq!(target["B"].position.unwrap().to_string(), "0x1080");
    }

    #[test]
    fn common_picks_the_largest_shared_resolution() {
        let outputs = set(vec![
            with_modes(
                "A",
                &[(1920, 1080, "60.00", true), (1280, 1024, "60.00", false)],
            ),
            with_modes("B", &[(1280, 1024, "75.00", true)]),
        ]);
        let target = synthesize(Strategy::Common, &outputs).unwrap();
        for name in ["A", "B"] {
            assert_eq!(target[name].mode, Some(Mode::new(1280, 1024)));
            assert_eq!(target[name].position.unwrap().to_string(), "0x0");
        }
    }

    #[test]
    fn common_with_no_shared_resolution_is_an_error() {
        let outputs = set(vec![
            with_modes("A", &[(1920, 1080, "60.00", true)]),
            with_modes("B", &[(1280, 1024, "75.00", true)]),
        ]);
        assert!(matches!(
            synthesize(Strategy::Common, &outputs),
            Err(Error::NoCommonMode)
        ));
    }

    #[test]
    fn clone_largest_mirrors_the_biggest_panel() {
        let outputs = set(vec![
            with_modes("A", &[(2560, 1440, "59.95", true)]),
            with_modes("B", &[(1920, 1080, "60.00", true)]),
        ]);
        let target = synthesize(Strategy::CloneLargest, &outputs).unwrap();
        assert_eq!(target["A"].mode, Some(Mode::new(2560, 1440)));
        assert_eq!(target["B"].mode, Some(Mode::new(2560, 1440)));
        // B does not support the reference resolution, so no rate is forced.
        assert_eq!(target["B"].rate, None);
        assert_eq!(target["B"].position.unwrap().to_string(), "0x0");
    }

    #[test]
    fn preferred_mode_beats_larger_modes() {
        let output = with_modes(
            "A",
            &[(3840, 2160, "30.00", false), (1920, 1080, "60.00", true)],
        );
        assert_eq!(best_mode(&output).unwrap().width, 1920);
    }

    #[test]
    fn synthesis_is_deterministic() {
        let outputs = set(vec![
            with_modes("A", &[(1920, 1080, "60.00", true)]),
            with_modes("B", &[(1280, 1024, "75.00", true)]),
        ]);
        let first = synthesize(Strategy::Horizontal, &outputs).unwrap();
        let second = synthesize(Strategy::Horizontal, &outputs).unwrap();
        assert_eq!(first, second);
    }
}
