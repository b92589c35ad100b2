use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Everything known about the display hardware at one point in time, keyed
/// by connector name. A new query always produces a new set; nothing mutates
/// a captured set in place.
pub type OutputSet = BTreeMap<String, Output>;

/// An active resolution. The refresh rate is kept as the exact text xrandr
/// reported so that values survive a save/load round-trip unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mode {
    pub width: u32,
    pub height: u32,
}

impl Mode {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once('x')
            .ok_or_else(|| format!("invalid mode '{}'", s))?;
        Ok(Self {
            width: w.parse().map_err(|_| format!("invalid mode '{}'", s))?,
            height: h.parse().map_err(|_| format!("invalid mode '{}'", s))?,
        })
    }
}

/// One entry of an output's supported-mode list, captured at query time.
/// Never persisted; only the virtual layout strategies consume it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModeInfo {
    pub width: u32,
    pub height: u32,
    pub rate: String,
    pub preferred: bool,
    pub current: bool,
}

impl ModeInfo {
    pub fn resolution(&self) -> Mode {
        Mode::new(self.width, self.height)
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Rotation {
    #[default]
    Normal,
    Left,
    Right,
    Inverted,
}

impl Rotation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rotation::Normal => "normal",
            Rotation::Left => "left",
            Rotation::Right => "right",
            Rotation::Inverted => "inverted",
        }
    }
}

impl FromStr for Rotation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(Rotation::Normal),
            "left" => Ok(Rotation::Left),
            "right" => Ok(Rotation::Right),
            "inverted" => Ok(Rotation::Inverted),
            other => Err(format!("invalid rotation '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Reflection {
    #[default]
    Normal,
    X,
    Y,
    Xy,
}

impl Reflection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reflection::Normal => "normal",
            Reflection::X => "x",
            Reflection::Y => "y",
            Reflection::Xy => "xy",
        }
    }
}

impl FromStr for Reflection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(Reflection::Normal),
            "x" => Ok(Reflection::X),
            "y" => Ok(Reflection::Y),
            "xy" => Ok(Reflection::Xy),
            other => Err(format!("invalid reflection '{}'", other)),
        }
    }
}

/// Offset in the virtual screen, xrandr's `XxY` notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.x, self.y)
    }
}

impl FromStr for Position {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (x, y) = s
            .split_once('x')
            .ok_or_else(|| format!("invalid position '{}'", s))?;
        Ok(Self {
            x: x.parse().map_err(|_| format!("invalid position '{}'", s))?,
            y: y.parse().map_err(|_| format!("invalid position '{}'", s))?,
        })
    }
}

/// Extra option values that equal these are redundant and stripped before
/// comparing or persisting a configuration.
const EXTRA_OPTION_DEFAULTS: &[(&str, &str)] = &[
    ("gamma", "1.0:1.0:1.0"),
    ("panning", "0x0"),
    ("transform", "1,0,0,0,1,0,0,0,1"),
];

/// One physical display connector: its identity and either its captured
/// state (after a query) or its target state (inside a profile).
///
/// An output with `mode == None` is off. `modes` and `lid_closed` are only
/// populated on queried outputs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Output {
    pub name: String,
    pub connected: bool,
    pub edid: Option<String>,
    pub mode: Option<Mode>,
    pub rate: Option<String>,
    pub position: Option<Position>,
    pub rotation: Rotation,
    pub reflection: Reflection,
    pub primary: bool,
    pub extra_options: BTreeMap<String, String>,
    #[serde(skip)]
    pub modes: Vec<ModeInfo>,
    #[serde(skip)]
    pub lid_closed: bool,
}

impl Output {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connected: false,
            edid: None,
            mode: None,
            rate: None,
            position: None,
            rotation: Rotation::Normal,
            reflection: Reflection::Normal,
            primary: false,
            extra_options: BTreeMap::new(),
            modes: Vec::new(),
            lid_closed: false,
        }
    }

    /// A target entry that turns the connector off.
    pub fn off(name: impl Into<String>, edid: Option<String>) -> Self {
        Self {
            edid,
            ..Self::new(name)
        }
    }

    pub fn is_active(&self) -> bool {
        self.mode.is_some()
    }

    /// Identity token for fingerprinting when the panel exposes no EDID.
    pub fn edid_unavailable_token(name: &str) -> String {
        format!("none-{}", name)
    }

    /// The token this output contributes to a fingerprint, if connected.
    pub fn identity_token(&self) -> Option<String> {
        if !self.connected {
            return None;
        }
        Some(
            self.edid
                .clone()
                .unwrap_or_else(|| Self::edid_unavailable_token(&self.name)),
        )
    }

    /// Drop extra options whose value equals the tool default; an off output
    /// carries no options at all.
    pub fn strip_default_options(&mut self) {
        if self.mode.is_none() {
            self.rate = None;
            self.position = None;
            self.rotation = Rotation::Normal;
            self.reflection = Reflection::Normal;
            self.primary = false;
            self.extra_options.clear();
            return;
        }
        for (key, default) in EXTRA_OPTION_DEFAULTS {
            if self.extra_options.get(*key).map(String::as_str) == Some(*default) {
                self.extra_options.remove(*key);
            }
        }
    }

    /// The lines of this output's block in a profile `config` file, starting
    /// with the `output <name>` header.
    pub fn config_lines(&self) -> Vec<String> {
        let mut lines = vec![format!("output {}", self.name)];
        match &self.mode {
            None => lines.push("off".to_string()),
            Some(mode) => {
                lines.push(format!("mode {}", mode));
                if let Some(rate) = &self.rate {
                    lines.push(format!("rate {}", rate));
                }
                if let Some(pos) = &self.position {
                    lines.push(format!("pos {}", pos));
                }
                if self.rotation != Rotation::Normal {
                    lines.push(format!("rotate {}", self.rotation.as_str()));
                }
                if self.reflection != Reflection::Normal {
                    lines.push(format!("reflect {}", self.reflection.as_str()));
                }
                if self.primary {
                    lines.push("primary".to_string());
                }
                for (key, value) in &self.extra_options {
                    if value.is_empty() {
                        lines.push(key.clone());
                    } else {
                        lines.push(format!("{} {}", key, value));
                    }
                }
            }
        }
        lines
    }
}

/// The outputs that are on in a configuration, in name order.
pub fn enabled_outputs(config: &OutputSet) -> Vec<&str> {
    config
        .values()
        .filter(|o| o.is_active())
        .map(|o| o.name.as_str())
        .collect()
}
