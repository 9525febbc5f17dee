//! Repository manifest (`db.yaml`).
//!
//! A line-oriented key/value file at the repository root. Unknown keys are
//! ignored; missing optional keys default per the manifest version.

use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

pub const MANIFEST_VERSION: u32 = 2;
pub const MANIFEST_FILE: &str = "db.yaml";

/// How stream directories are laid out under `documents/<collection>/`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum StreamLayout {
    Flat,
    #[default]
    Sharded,
}

impl StreamLayout {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamLayout::Flat => "flat",
            StreamLayout::Sharded => "sharded",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ManifestError> {
        match value.trim() {
            "flat" => Ok(StreamLayout::Flat),
            "sharded" => Ok(StreamLayout::Sharded),
            other => Err(ManifestError::InvalidLayout {
                raw: other.to_string(),
            }),
        }
    }
}

/// Whether stream writes append to history or rewrite it in place.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum HistoryMode {
    #[default]
    Append,
    Amend,
}

impl HistoryMode {
    pub fn as_str(self) -> &'static str {
        match self {
            HistoryMode::Append => "append",
            HistoryMode::Amend => "amend",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ManifestError> {
        match value.trim() {
            "append" => Ok(HistoryMode::Append),
            "amend" => Ok(HistoryMode::Amend),
            other => Err(ManifestError::InvalidHistoryMode {
                raw: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest version `{raw}` is invalid")]
    InvalidVersion { raw: String },
    #[error("stream layout `{raw}` is invalid")]
    InvalidLayout { raw: String },
    #[error("history mode `{raw}` is invalid")]
    InvalidHistoryMode { raw: String },
    #[error("created_at `{raw}` is not RFC 3339")]
    InvalidCreatedAt { raw: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Manifest {
    pub version: u32,
    pub name: String,
    pub stream_layout: StreamLayout,
    pub history_mode: HistoryMode,
    pub created_at: Option<OffsetDateTime>,
}

impl Manifest {
    pub fn new(name: impl Into<String>, created_at: OffsetDateTime) -> Self {
        Self {
            version: MANIFEST_VERSION,
            name: name.into(),
            stream_layout: StreamLayout::default(),
            history_mode: HistoryMode::default(),
            created_at: Some(created_at),
        }
    }

    /// Normalize a partially-populated manifest.
    pub fn with_defaults(mut self) -> Self {
        if self.version == 0 {
            self.version = 1;
        }
        self
    }

    /// Render to `db.yaml` text.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("version: {}\n", self.version));
        out.push_str(&format!("name: {}\n", self.name));
        out.push_str(&format!("stream_layout: {}\n", self.stream_layout.as_str()));
        out.push_str(&format!("history_mode: {}\n", self.history_mode.as_str()));
        if let Some(created_at) = self.created_at {
            if let Ok(stamp) = created_at.format(&Rfc3339) {
                out.push_str(&format!("created_at: {stamp}\n"));
            }
        }
        out
    }

    /// Parse `db.yaml` text. Unknown keys are ignored.
    pub fn parse(data: &str) -> Result<Self, ManifestError> {
        let mut manifest = Manifest {
            version: 0,
            name: String::new(),
            stream_layout: StreamLayout::default(),
            history_mode: HistoryMode::default(),
            created_at: None,
        };
        let mut layout_seen = false;

        for line in data.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();
            match key {
                "version" => {
                    manifest.version =
                        value.parse().map_err(|_| ManifestError::InvalidVersion {
                            raw: value.to_string(),
                        })?;
                }
                "name" => manifest.name = value.to_string(),
                "stream_layout" => {
                    manifest.stream_layout = StreamLayout::parse(value)?;
                    layout_seen = true;
                }
                "history_mode" => manifest.history_mode = HistoryMode::parse(value)?,
                "created_at" => {
                    if value.is_empty() {
                        continue;
                    }
                    let parsed = OffsetDateTime::parse(value, &Rfc3339).map_err(|_| {
                        ManifestError::InvalidCreatedAt {
                            raw: value.to_string(),
                        }
                    })?;
                    manifest.created_at = Some(parsed);
                }
                _ => {}
            }
        }

        let mut manifest = manifest.with_defaults();
        // Version-1 repositories predate sharding; an unset layout there
        // means flat.
        if manifest.version < 2 && !layout_seen {
            manifest.stream_layout = StreamLayout::Flat;
        }
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn render_parse_roundtrip() {
        let manifest = Manifest::new("orders", datetime!(2026-01-15 10:30:00 UTC));
        let text = manifest.render();
        let parsed = Manifest::parse(&text).unwrap();
        assert_eq!(parsed.version, MANIFEST_VERSION);
        assert_eq!(parsed.name, "orders");
        assert_eq!(parsed.stream_layout, StreamLayout::Sharded);
        assert_eq!(parsed.history_mode, HistoryMode::Append);
        assert!(parsed.created_at.is_some());
    }

    #[test]
    fn unknown_keys_ignored() {
        let parsed =
            Manifest::parse("version: 2\nname: x\nfuture_flag: yes\n").unwrap();
        assert_eq!(parsed.name, "x");
    }

    #[test]
    fn version_one_defaults_to_flat() {
        let parsed = Manifest::parse("version: 1\nname: legacy\n").unwrap();
        assert_eq!(parsed.stream_layout, StreamLayout::Flat);
    }

    #[test]
    fn version_two_defaults_to_sharded() {
        let parsed = Manifest::parse("version: 2\nname: fresh\n").unwrap();
        assert_eq!(parsed.stream_layout, StreamLayout::Sharded);
    }

    #[test]
    fn explicit_layout_wins_over_version_default() {
        let parsed = Manifest::parse("version: 1\nname: x\nstream_layout: sharded\n").unwrap();
        assert_eq!(parsed.stream_layout, StreamLayout::Sharded);
    }

    #[test]
    fn invalid_values_error() {
        assert!(Manifest::parse("stream_layout: spiral\n").is_err());
        assert!(Manifest::parse("history_mode: rebase\n").is_err());
        assert!(Manifest::parse("version: two\n").is_err());
        assert!(Manifest::parse("created_at: yesterday\n").is_err());
    }

    #[test]
    fn amend_mode_parses() {
        let parsed = Manifest::parse("version: 2\nhistory_mode: amend\n").unwrap();
        assert_eq!(parsed.history_mode, HistoryMode::Amend);
    }
}
