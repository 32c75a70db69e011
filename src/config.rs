use eyre::{bail, eyre, Result, WrapErr};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

/// Top-level monitor config. Every block carries a `type` discriminator and is
/// handed raw to the registry that builds it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub collectors: Vec<Value>,
    #[serde(default)]
    pub notifiers: Vec<Value>,
    #[serde(default)]
    pub strategies: Vec<Value>,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read config {}", path.display()))?;
        Self::from_json(&raw).wrap_err_with(|| format!("failed to parse config {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(raw)?;
        for (section, blocks) in [
            ("collectors", &config.collectors),
            ("notifiers", &config.notifiers),
            ("strategies", &config.strategies),
        ] {
            for (index, block) in blocks.iter().enumerate() {
                component_kind(block).wrap_err_with(|| format!("{}[{}]", section, index))?;
            }
        }
        Ok(config)
    }
}

/// The `type` discriminator of a raw component block.
pub fn component_kind(raw: &Value) -> Result<&str> {
    match raw.get("type") {
        Some(Value::String(kind)) if !kind.is_empty() => Ok(kind.as_str()),
        Some(other) => Err(eyre!("`type` must be a non-empty string, got {}", other)),
        None => Err(eyre!("missing `type` field")),
    }
}

/// Parses a Go-style duration string such as `5s`, `15m`, `1h30m` or `1.5s`.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let s = input.trim();
    if s.is_empty() {
        bail!("empty duration");
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = 0f64;
    let mut rest = s;
    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| eyre!("missing unit in duration `{}`", input))?;
        if num_len == 0 {
            bail!("invalid duration `{}`", input);
        }
        let value: f64 = rest[..num_len]
            .parse()
            .wrap_err_with(|| format!("invalid number in duration `{}`", input))?;
        rest = &rest[num_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let nanos_per_unit = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            unit => bail!("unknown unit `{}` in duration `{}`", unit, input),
        };
        rest = &rest[unit_len..];
        total += value * nanos_per_unit;
    }

    Ok(Duration::from_nanos(total.round() as u64))
}

/// Serde helper for optional duration strings. Missing, null and empty values
/// deserialize to `None` so the caller can apply its default.
pub fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => parse_duration(s)
            .map(Some)
            .map_err(|e| serde::de::Error::custom(format!("{:#}", e))),
    }
}
