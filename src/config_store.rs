//! Calibration config storage and lookup.
//!
//! The calibration config is a flat JSON object mapping names to values. The
//! recognized shapes are:
//!
//! - `<target>`: platform position in mm for a named pour target
//! - `pumpN` (N = 1..4): target name served by pump N
//! - `pumpN_time`: pump flow rate in ms per cl (default 1000)
//! - `pumpN_position`: platform position in front of pump N (default 250)
//! - `pour_time`: ms per 2 cl for servo pours (default 2000)
//! - `move_wait` / `drip_wait` / `refill_wait`: wait placeholders (500/1000/5000 ms)
//!
//! Anything else (network credentials, UI settings) is carried through untouched.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};
use tracing::{debug, info, warn};

/// Default pump flow rate in ms per cl.
pub const DEFAULT_PUMP_FLOW_MS_PER_CL: f64 = 1000.0;

/// Default platform position for a pump in mm.
pub const DEFAULT_PUMP_POSITION_MM: i64 = 250;

/// Default servo pour time in ms per 2 cl.
pub const DEFAULT_POUR_TIME_MS: f64 = 2000.0;

/// Key holding the servo pour time.
pub const POUR_TIME_KEY: &str = "pour_time";

/// Keys that survive a save even when the incoming payload omits them.
pub const PROTECTED_KEYS: &[&str] = &["wlan_ssid", "wlan_password"];

/// Number of pump slots on the rig.
pub const PUMP_COUNT: u8 = 4;

/// One of the four pump slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct PumpId(u8);

impl PumpId {
    /// Create a pump id, rejecting slots outside 1..=4.
    pub fn new(slot: u8) -> Option<Self> {
        (1..=PUMP_COUNT).contains(&slot).then_some(Self(slot))
    }

    /// Slot number (1-based).
    #[inline]
    pub fn get(self) -> u8 {
        self.0
    }

    /// All slots, lowest first.
    pub fn all() -> impl Iterator<Item = PumpId> {
        (1..=PUMP_COUNT).map(Self)
    }

    /// Config key holding the target name assigned to this pump.
    pub fn assignment_key(self) -> String {
        format!("pump{}", self.0)
    }

    /// Config key holding this pump's flow rate.
    pub fn flow_rate_key(self) -> String {
        format!("pump{}_time", self.0)
    }

    /// Config key holding this pump's platform position.
    pub fn position_key(self) -> String {
        format!("pump{}_position", self.0)
    }
}

impl TryFrom<u8> for PumpId {
    type Error = String;

    fn try_from(slot: u8) -> std::result::Result<Self, Self::Error> {
        Self::new(slot).ok_or_else(|| format!("pump slot must be 1..={}, got {}", PUMP_COUNT, slot))
    }
}

impl From<PumpId> for u8 {
    fn from(pump: PumpId) -> Self {
        pump.0
    }
}

impl fmt::Display for PumpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Symbolic wait durations resolved from the config at execution time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum WaitPlaceholder {
    /// Settling time after a platform move
    MoveWait,
    /// Drip time after the last pour of an ingredient
    DripWait,
    /// Refill time between consecutive servo pours
    RefillWait,
}

impl WaitPlaceholder {
    /// Duration used when the config has no entry for this placeholder.
    pub const fn default_ms(self) -> u64 {
        match self {
            Self::MoveWait => 500,
            Self::DripWait => 1000,
            Self::RefillWait => 5000,
        }
    }
}

/// A single config value.
///
/// Values written by the calibration UI are sometimes numbers and sometimes
/// numeric strings, so the numeric accessors accept both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Integer(i64),
    Float(f64),
    Text(String),
    Other(serde_json::Value),
}

impl ConfigValue {
    /// Integer view (floats are rounded, numeric strings parsed).
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            Self::Float(v) if v.is_finite() => Some(v.round() as i64),
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Floating point view.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(v) => Some(*v as f64),
            Self::Float(v) if v.is_finite() => Some(*v),
            Self::Text(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
            _ => None,
        }
    }

    /// Value typed at a prompt: integers and floats become numbers,
    /// anything else is kept as text.
    pub fn from_input(raw: &str) -> Self {
        let raw = raw.trim();
        if let Ok(v) = raw.parse::<i64>() {
            return Self::Integer(v);
        }
        match raw.parse::<f64>() {
            Ok(v) if v.is_finite() => Self::Float(v),
            _ => Self::Text(raw.to_string()),
        }
    }

    /// String view; only text values qualify.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<i64> for ConfigValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<i32> for ConfigValue {
    fn from(v: i32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<f64> for ConfigValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for ConfigValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Text(s) => write!(f, "{}", s),
            Self::Other(v) => write!(f, "{}", v),
        }
    }
}

/// Returns true if `target` is a literal platform position (ASCII digits only).
pub fn is_numeric_target(target: &str) -> bool {
    !target.is_empty() && target.bytes().all(|b| b.is_ascii_digit())
}

/// Flat calibration config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Config {
    entries: BTreeMap<String, ConfigValue>,
}

impl Config {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert or replace an entry.
    pub fn set_entry(&mut self, key: impl Into<String>, value: impl Into<ConfigValue>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<ConfigValue> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ConfigValue)> {
        self.entries.iter()
    }

    /// Returns true for keys that configure the rig rather than name a target.
    pub fn is_reserved_key(key: &str) -> bool {
        if key == POUR_TIME_KEY || PROTECTED_KEYS.contains(&key) {
            return true;
        }
        if WaitPlaceholder::iter().any(|p| p.to_string() == key) {
            return true;
        }
        PumpId::all().any(|p| {
            key == p.assignment_key() || key == p.flow_rate_key() || key == p.position_key()
        })
    }

    /// Position of a directly configured target.
    pub fn direct_position(&self, target: &str) -> Option<i64> {
        if Self::is_reserved_key(target) {
            return None;
        }
        self.get(target).and_then(ConfigValue::as_i64)
    }

    /// Pump serving `target`, if any.
    ///
    /// When several slots carry the same target name the lowest slot number
    /// wins.
    pub fn resolve_pump_for(&self, target: &str) -> Option<PumpId> {
        PumpId::all().find(|pump| {
            self.get(&pump.assignment_key())
                .and_then(ConfigValue::as_str)
                .is_some_and(|assigned| assigned == target)
        })
    }

    /// Platform position for `target`: numeric literal, then direct entry,
    /// then the position of the pump serving it.
    pub fn resolve_position(&self, target: &str) -> Option<i64> {
        if is_numeric_target(target) {
            return target.parse().ok();
        }
        self.direct_position(target)
            .or_else(|| self.resolve_pump_for(target).map(|p| self.pump_position(p)))
    }

    /// Flow rate of `pump` in ms per cl.
    pub fn pump_flow_rate(&self, pump: PumpId) -> f64 {
        self.get(&pump.flow_rate_key())
            .and_then(ConfigValue::as_f64)
            .filter(|v| *v >= 0.0)
            .unwrap_or(DEFAULT_PUMP_FLOW_MS_PER_CL)
    }

    /// Platform position of `pump` in mm.
    pub fn pump_position(&self, pump: PumpId) -> i64 {
        self.get(&pump.position_key())
            .and_then(ConfigValue::as_i64)
            .unwrap_or(DEFAULT_PUMP_POSITION_MM)
    }

    /// Returns true if a usable `pour_time` is configured.
    pub fn has_pour_time(&self) -> bool {
        self.get(POUR_TIME_KEY)
            .and_then(ConfigValue::as_f64)
            .is_some()
    }

    /// Servo pour time in ms per 2 cl.
    pub fn pour_time(&self) -> f64 {
        self.get(POUR_TIME_KEY)
            .and_then(ConfigValue::as_f64)
            .filter(|v| *v >= 0.0)
            .unwrap_or(DEFAULT_POUR_TIME_MS)
    }

    /// Duration of a wait placeholder, or `None` if the name is unknown.
    pub fn wait_ms(&self, placeholder: &str) -> Option<u64> {
        let key: WaitPlaceholder = placeholder.parse().ok()?;
        let configured = self
            .get(placeholder)
            .and_then(ConfigValue::as_i64)
            .and_then(|v| u64::try_from(v).ok());
        Some(configured.unwrap_or_else(|| key.default_ms()))
    }

    /// Target names a recipe may pour from: direct entries plus pump assignments.
    pub fn drinks(&self) -> Vec<String> {
        let mut drinks: Vec<String> = self
            .entries
            .iter()
            .filter(|(key, value)| !Self::is_reserved_key(key) && value.as_i64().is_some())
            .map(|(key, _)| key.clone())
            .collect();

        for pump in PumpId::all() {
            if let Some(name) = self.get(&pump.assignment_key()).and_then(ConfigValue::as_str) {
                if !name.is_empty() && !drinks.iter().any(|d| d == name) {
                    drinks.push(name.to_string());
                }
            }
        }
        drinks
    }

    /// Store calibration for one pump slot. An empty or missing drink keeps
    /// the current assignment.
    pub fn calibrate_pump(
        &mut self,
        pump: PumpId,
        drink: Option<&str>,
        flow_ms_per_cl: i64,
        position_mm: i64,
    ) {
        if let Some(drink) = drink.map(str::trim).filter(|d| !d.is_empty()) {
            self.set_entry(pump.assignment_key(), drink);
        }
        self.set_entry(pump.flow_rate_key(), flow_ms_per_cl);
        self.set_entry(pump.position_key(), position_mm);
    }
}

impl FromIterator<(String, ConfigValue)> for Config {
    fn from_iter<I: IntoIterator<Item = (String, ConfigValue)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Carry protected keys from `existing` into `incoming` when the incoming
/// payload omits them.
pub fn merge_protected(existing: &Config, mut incoming: Config) -> Config {
    for key in PROTECTED_KEYS {
        if incoming.contains_key(key) {
            continue;
        }
        if let Some(value) = existing.get(key) {
            incoming.set_entry(*key, value.clone());
        }
    }
    incoming
}

/// JSON file backed config store.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the config. A missing or unreadable file yields an empty config.
    pub fn load(&self) -> Config {
        match self.try_load() {
            Ok(config) => config,
            Err(e) => {
                warn!("Using empty calibration config: {:#}", e);
                Config::new()
            }
        }
    }

    /// Load the config, reporting why it could not be read.
    pub fn try_load(&self) -> Result<Config> {
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read config from {:?}", self.path))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config JSON in {:?}", self.path))?;
        debug!("Loaded {} config entries from {:?}", config.len(), self.path);
        Ok(config)
    }

    /// Persist `incoming`, keeping protected keys from the stored config.
    ///
    /// Returns the config that was written.
    pub fn save(&self, incoming: Config) -> Result<Config> {
        let existing = if self.path.exists() {
            self.load()
        } else {
            Config::new()
        };
        let merged = merge_protected(&existing, incoming);

        let json = serde_json::to_string_pretty(&merged)
            .context("Failed to serialize config to JSON")?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {:?}", parent))?;
        }

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("Failed to write config to {:?}", tmp))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to move config into place at {:?}", self.path))?;

        info!("Saved {} config entries to {:?}", merged.len(), self.path);
        Ok(merged)
    }
}
