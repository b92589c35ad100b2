use crate::error::{Error, Result};
use crate::output::{Mode, ModeInfo, Output, OutputSet, Position, Reflection, Rotation};
use regex::Regex;
use std::collections::BTreeSet;
use std::process::Command;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The display tool boundary: query the live state, realize a target state.
/// The selection core only ever sees the resulting OutputSet values.
pub trait DisplayBackend {
    fn query(&self) -> Result<OutputSet>;

    /// Apply `target`, consulting `current` to know what must be reset or
    /// disabled. Option names in `skip` are neither compared nor applied.
    fn apply(
        &self,
        target: &OutputSet,
        current: &OutputSet,
        skip: &BTreeSet<String>,
    ) -> Result<()>;
}

/// Drives the `xrandr` binary.
pub struct Xrandr {
    pub dry_run: bool,
}

impl Xrandr {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }

    fn call(&self, args: &[String]) -> Result<()> {
        if self.dry_run {
            println!("xrandr {}", args.join(" "));
            return Ok(());
        }
        // Some drivers fail transiently right after an output change; one
        // retry after a second settles them.
        match run_xrandr(args) {
            Ok(()) => Ok(()),
            Err(first) => {
                warn!("xrandr failed ({}), retrying once", first);
                std::thread::sleep(Duration::from_secs(1));
                run_xrandr(args)
            }
        }
    }
}

fn run_xrandr(args: &[String]) -> Result<()> {
    let output = Command::new("xrandr")
        .args(args)
        .output()
        .map_err(|e| Error::Apply(format!("failed to run xrandr: {}", e)))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Apply(format!(
            "xrandr {} exited with {}: {}",
            args.join(" "),
            output.status,
            stderr.trim()
        )));
    }
    Ok(())
}

impl DisplayBackend for Xrandr {
    fn query(&self) -> Result<OutputSet> {
        let output = Command::new("xrandr")
            .args(["-q", "--verbose"])
            .output()
            .map_err(|e| Error::Apply(format!("failed to run xrandr: {}", e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Apply(format!(
                "xrandr -q --verbose exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        let text = String::from_utf8_lossy(&output.stdout);
        let mut outputs = parse_verbose(&text)?;

        if lid_closed() {
            for output in outputs.values_mut() {
                if output.connected && is_internal(&output.name) {
                    output.lid_closed = true;
                }
            }
        }
        Ok(outputs)
    }

    fn apply(
        &self,
        target: &OutputSet,
        current: &OutputSet,
        skip: &BTreeSet<String>,
    ) -> Result<()> {
        let mut names: Vec<&String> = target.keys().collect();
        names.sort_by_key(|name| sort_key(&target[*name]));

        let mut base = Vec::new();
        let (fb_width, fb_height) = fb_dimensions(target);
        if fb_width > 0 && fb_height > 0 {
            base.push("--fb".to_string());
            base.push(format!("{}x{}", fb_width, fb_height));
        }

        let mut disable: Vec<Vec<String>> = Vec::new();
        let mut enable: Vec<Vec<String>> = Vec::new();
        let mut remain_active = 0usize;
        for name in names {
            let output = &target[name];
            let vector = option_vector(output, current.get(name), skip);
            if output.is_active() {
                if current.get(name).map(Output::is_active).unwrap_or(false) {
                    remain_active += 1;
                }
                enable.push(vector);
            } else {
                disable.push(vector);
            }
        }

        // Disable unused outputs first (enabled-output limits), but never
        // turn off the last active screen before its replacement is up.
        let keep_one = remain_active == 0;
        let batch_len = if keep_one {
            disable.len().saturating_sub(1)
        } else {
            disable.len()
        };
        if batch_len > 0 {
            let mut args = base.clone();
            args.extend(disable[..batch_len].iter().flatten().cloned());
            match self.call(&args) {
                Ok(()) => {
                    disable.drain(..batch_len);
                }
                Err(e) => {
                    // Retried below interleaved with the enables.
                    debug!("Deferred disabling outputs: {}", e);
                }
            }
        }

        // Issuing the remaining operations two at a time works around
        // drivers that reject enabling more than two screens per call. Pad
        // with a no-op so a pair never disables the final two screens at
        // once.
        if !disable.is_empty() && disable.len() % 2 == 0 {
            disable.insert(0, vec!["--query".to_string()]);
        }
        let operations: Vec<Vec<String>> = disable.into_iter().chain(enable).collect();
        for pair in operations.chunks(2) {
            let mut args = base.clone();
            args.extend(pair.iter().flatten().cloned());
            self.call(&args)?;
        }
        Ok(())
    }
}

/// Apply order: identity-less outputs first, then outputs being turned off,
/// then active outputs by position so the screen at 0x0 comes up first.
fn sort_key(output: &Output) -> i64 {
    if output.edid.is_none() {
        return i64::MIN;
    }
    if !output.is_active() {
        return i64::MIN + 1;
    }
    let pos = output.position.unwrap_or(Position { x: 0, y: 0 });
    pos.x as i64 + 10_000 * pos.y as i64
}

/// The virtual screen size the target needs: the furthest extent of any
/// active output, its mode rotated and panning area included.
fn fb_dimensions(target: &OutputSet) -> (u32, u32) {
    let mut width = 0u32;
    let mut height = 0u32;
    for output in target.values() {
        let Some(mode) = &output.mode else { continue };
        let rotated = matches!(output.rotation, Rotation::Left | Rotation::Right);
        let (mut w, mut h) = if rotated {
            (mode.height, mode.width)
        } else {
            (mode.width, mode.height)
        };
        if let Some(panning) = output.extra_options.get("panning") {
            if let Some((pw, ph)) = parse_panning_extent(panning) {
                (w, h) = (pw, ph);
            }
        } else {
            let pos = output.position.unwrap_or(Position { x: 0, y: 0 });
            w = w.saturating_add_signed(pos.x);
            h = h.saturating_add_signed(pos.y);
        }
        width = width.max(w);
        height = height.max(h);
    }
    (width, height)
}

fn parse_panning_extent(panning: &str) -> Option<(u32, u32)> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"^(\d+)x(\d+)(?:\+(\d+))?(?:\+(\d+))?").unwrap()
    });
    let caps = re.captures(panning)?;
    let w: u32 = caps[1].parse().ok()?;
    let h: u32 = caps[2].parse().ok()?;
    let x: u32 = caps.get(3).map_or(0, |m| m.as_str().parse().unwrap_or(0));
    let y: u32 = caps.get(4).map_or(0, |m| m.as_str().parse().unwrap_or(0));
    Some((w + x, h + y))
}

/// The xrandr arguments realizing one output's target state. Fields the
/// target leaves at their default are still set explicitly (or reset against
/// `current`), so stale state from the previous layout never survives.
fn option_vector(
    output: &Output,
    current: Option<&Output>,
    skip: &BTreeSet<String>,
) -> Vec<String> {
    let mut args = vec!["--output".to_string(), output.name.clone()];
    let Some(mode) = &output.mode else {
        args.push("--off".to_string());
        return args;
    };

    if !skip.contains("mode") {
        args.push("--mode".to_string());
        args.push(mode.to_string());
    }
    if !skip.contains("rate") {
        if let Some(rate) = &output.rate {
            args.push("--rate".to_string());
            args.push(rate.clone());
        }
    }
    if !skip.contains("pos") {
        if let Some(pos) = &output.position {
            args.push("--pos".to_string());
            args.push(pos.to_string());
        }
    }
    if !skip.contains("rotate") {
        args.push("--rotate".to_string());
        args.push(output.rotation.as_str().to_string());
    }
    if !skip.contains("reflect") {
        args.push("--reflect".to_string());
        args.push(output.reflection.as_str().to_string());
    }
    if output.primary && !skip.contains("primary") {
        args.push("--primary".to_string());
    }

    if !skip.contains("gamma") {
        let gamma = output
            .extra_options
            .get("gamma")
            .map(String::as_str)
            .unwrap_or("1.0:1.0:1.0");
        args.push("--gamma".to_string());
        args.push(gamma.to_string());
    }

    // transform and panning are only touched when the target sets them or
    // the live state has them to clear; unconditional use trips up several
    // drivers.
    let had = |key: &str| {
        current
            .map(|c| c.extra_options.contains_key(key))
            .unwrap_or(false)
    };
    if !skip.contains("transform") {
        match output.extra_options.get("transform") {
            Some(transform) => {
                args.push("--transform".to_string());
                args.push(transform.clone());
            }
            None if had("transform") => {
                args.push("--transform".to_string());
                args.push("none".to_string());
            }
            None => {}
        }
    }
    if !skip.contains("panning") {
        match output.extra_options.get("panning") {
            Some(panning) => {
                args.push("--panning".to_string());
                args.push(panning.clone());
            }
            None if had("panning") => {
                args.push("--panning".to_string());
                args.push("0x0".to_string());
            }
            None => {}
        }
    }

    for (key, value) in &output.extra_options {
        if matches!(key.as_str(), "gamma" | "transform" | "panning") || skip.contains(key) {
            continue;
        }
        args.push(format!("--{}", key));
        if !value.is_empty() {
            args.push(value.clone());
        }
    }
    args
}

fn is_internal(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    ["edp", "lvds", "dsi"]
        .iter()
        .any(|prefix| lower.starts_with(prefix))
}

/// Whether an ACPI lid switch reports closed. No lid switch means open.
fn lid_closed() -> bool {
    let Ok(paths) = glob::glob("/proc/acpi/button/lid/*/state") else {
        return false;
    };
    for path in paths.flatten() {
        if let Ok(state) = std::fs::read_to_string(&path) {
            if state.contains("closed") {
                info!("Lid reported closed by {:?}", path);
                return true;
            }
        }
    }
    false
}

fn header_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?x)
            ^(?P<name>[^\s]+)\s+
            (?P<status>connected|disconnected|unknown\ connection)
            (?P<primary>\s+primary)?
            (?:\s+
                (?P<w>\d+)x(?P<h>\d+)\+(?P<x>-?\d+)\+(?P<y>-?\d+)
                (?:\s+\(0x[0-9a-fA-F]+\))?
                \s+(?P<rotate>normal|left|right|inverted)
                (?:\s+(?P<reflect>X\ and\ Y|X|Y)\ axis)?
            )?",
        )
        .unwrap()
    })
}

fn mode_header_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s+(\S+)\s+\(0x[0-9a-fA-F]+\)\s+[0-9.]+MHz(.*)$").unwrap()
    })
}

fn panning_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"panning\s+(?P<pan>\d+x\d+\+\d+\+\d+)(?:\s+tracking\s+(?P<track>\d+x\d+\+\d+\+\d+))?(?:\s+border\s+(?P<border>(?:\d+/){3}\d+))?",
        )
        .unwrap()
    })
}

/// Parse the output of `xrandr -q --verbose` into an OutputSet.
pub fn parse_verbose(text: &str) -> Result<OutputSet> {
    let mut outputs = OutputSet::new();
    let mut current: Option<Output> = None;
    let mut pending_mode: Option<ModeDraft> = None;

    let mut lines = text.lines().peekable();
    while let Some(line) = lines.next() {
        if line.starts_with("Screen ") {
            continue;
        }

        if let Some(caps) = header_regex().captures(line) {
            finish_mode(&mut pending_mode, &mut current);
            if let Some(done) = current.take() {
                outputs.insert(done.name.clone(), done);
            }
            current = Some(parse_header(&caps, line));
            continue;
        }
        if current.is_none() {
            continue;
        }

        if let Some(caps) = mode_header_regex().captures(line) {
            finish_mode(&mut pending_mode, &mut current);
            let flags = caps.get(2).map_or("", |m| m.as_str());
            pending_mode = Some(ModeDraft {
                width: None,
                height: None,
                rate: None,
                preferred: flags.contains("+preferred"),
                current: flags.contains("*current"),
            });
            continue;
        }

        let trimmed = line.trim_start();
        if pending_mode.is_some() {
            if trimmed.starts_with("h:") {
                if let Some(draft) = pending_mode.as_mut() {
                    draft.width = field_after(trimmed, "width");
                }
                continue;
            }
            if trimmed.starts_with("v:") {
                if let Some(draft) = pending_mode.as_mut() {
                    draft.height = field_after(trimmed, "height");
                    draft.rate = trimmed
                        .rsplit_once("clock")
                        .map(|(_, clock)| clock.trim().trim_end_matches("Hz").to_string());
                }
                finish_mode(&mut pending_mode, &mut current);
                continue;
            }
        }

        if trimmed.starts_with("EDID:") {
            let mut edid = String::new();
            while let Some(next) = lines.peek() {
                let hex = next.trim();
                if hex.len() >= 2 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
                    edid.push_str(hex);
                    lines.next();
                } else {
                    break;
                }
            }
            if !edid.is_empty() {
                if let Some(output) = current.as_mut() {
                    output.edid = Some(edid.to_ascii_lowercase());
                }
            }
        } else if let Some(value) = trimmed.strip_prefix("Gamma:") {
            if let Some(gamma) = invert_gamma(value.trim()) {
                if let Some(output) = current.as_mut() {
                    output.extra_options.insert("gamma".to_string(), gamma);
                }
            }
        } else if let Some(row) = trimmed.strip_prefix("Transform:") {
            let mut cells: Vec<String> =
                row.split_whitespace().map(str::to_string).collect();
            for _ in 0..2 {
                if let Some(next) = lines.next() {
                    cells.extend(next.split_whitespace().map(str::to_string));
                }
            }
            if cells.len() == 9 && !is_identity_transform(&cells) {
                if let Some(output) = current.as_mut() {
                    output
                        .extra_options
                        .insert("transform".to_string(), cells.join(","));
                }
            }
        }
    }
    finish_mode(&mut pending_mode, &mut current);
    if let Some(done) = current.take() {
        outputs.insert(done.name.clone(), done);
    }

    if outputs.is_empty() {
        return Err(Error::XrandrParse(
            "no output boundaries found".to_string(),
        ));
    }
    for output in outputs.values_mut() {
        output.strip_default_options();
    }
    Ok(outputs)
}

struct ModeDraft {
    width: Option<u32>,
    height: Option<u32>,
    rate: Option<String>,
    preferred: bool,
    current: bool,
}

fn finish_mode(pending: &mut Option<ModeDraft>, output: &mut Option<Output>) {
    let Some(draft) = pending.take() else { return };
    let Some(output) = output.as_mut() else { return };
    let (Some(width), Some(height), Some(rate)) = (draft.width, draft.height, draft.rate)
    else {
        return;
    };
    if draft.current {
        // The mode list carries the unrotated size; prefer it over the
        // header geometry, which is post-rotation.
        output.mode = Some(Mode::new(width, height));
        output.rate = Some(rate.clone());
    }
    output.modes.push(ModeInfo {
        width,
        height,
        rate,
        preferred: draft.preferred,
        current: draft.current,
    });
}

fn field_after(line: &str, field: &str) -> Option<u32> {
    let rest = line.split_once(field)?.1;
    rest.split_whitespace().next()?.parse().ok()
}

fn parse_header(caps: &regex::Captures<'_>, line: &str) -> Output {
    let mut output = Output::new(&caps["name"]);
    output.connected = &caps["status"] == "connected";
    output.primary = caps.name("primary").is_some();

    if let (Some(w), Some(h)) = (caps.name("w"), caps.name("h")) {
        let width: u32 = w.as_str().parse().unwrap_or(0);
        let height: u32 = h.as_str().parse().unwrap_or(0);
        if let Some(rotate) = caps.name("rotate") {
            output.rotation = rotate.as_str().parse().unwrap_or(Rotation::Normal);
        }
        output.reflection = match caps.name("reflect").map(|m| m.as_str()) {
            Some("X") => Reflection::X,
            Some("Y") => Reflection::Y,
            Some("X and Y") => Reflection::Xy,
            _ => Reflection::Normal,
        };
        // Header geometry is rotated; normalize so the stored mode matches
        // the mode table. Overridden by the *current mode entry anyway.
        output.mode = Some(match output.rotation {
            Rotation::Left | Rotation::Right => Mode::new(height, width),
            _ => Mode::new(width, height),
        });
        output.position = Some(Position {
            x: caps["x"].parse().unwrap_or(0),
            y: caps["y"].parse().unwrap_or(0),
        });
    }

    if let Some(caps) = panning_regex().captures(line) {
        let mut panning = caps["pan"].to_string();
        if let Some(track) = caps.name("track") {
            panning.push('/');
            panning.push_str(track.as_str());
            if let Some(border) = caps.name("border") {
                panning.push('/');
                panning.push_str(border.as_str());
            }
        }
        output.extra_options.insert("panning".to_string(), panning);
    }
    output
}

/// xrandr reports the reciprocal of the gamma it accepts as a parameter;
/// convert back, clamping 0 the way the tool itself auto-corrects it.
fn invert_gamma(reported: &str) -> Option<String> {
    let mut parts = Vec::new();
    for component in reported.split(':') {
        let value: f64 = component.trim().parse().ok()?;
        let inverted = if value <= 0.0 { 1e10 } else { 1.0 / value };
        let rounded = (inverted * 1000.0).round() / 1000.0;
        parts.push(format_gamma(rounded.max(1e-10)));
    }
    if parts.len() != 3 {
        return None;
    }
    Some(parts.join(":"))
}

fn format_gamma(value: f64) -> String {
    let mut text = format!("{:.3}", value);
    while text.ends_with('0') {
        text.pop();
    }
    if text.ends_with('.') {
        text.push('0');
    }
    text
}

fn is_identity_transform(cells: &[String]) -> bool {
    const IDENTITY: [f64; 9] = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];
    cells.len() == 9
        && cells
            .iter()
            .zip(IDENTITY)
            .all(|(cell, expected)| cell.parse::<f64>().map_or(false, |v| v == expected))
}
