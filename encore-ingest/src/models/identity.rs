//! External artist identity keys
//!
//! An import is triggered with an id from either external catalog. The
//! canonical text form is `<source>:<id>`, e.g. `event:K8vZ917Gku7` or
//! `music:4Z8W4fKeB5YxbusRsdQVPb`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Which external catalog an id belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogSource {
    /// Ticketing / event catalog (attractions, events, venues)
    Event,
    /// Streaming / music catalog (artists, albums, tracks)
    Music,
}

impl CatalogSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CatalogSource::Event => "event",
            CatalogSource::Music => "music",
        }
    }
}

/// External identity of an artist
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey {
    source: CatalogSource,
    external_id: String,
}

impl IdentityKey {
    pub fn new(source: CatalogSource, external_id: impl Into<String>) -> Result<Self, String> {
        let external_id = external_id.into().trim().to_string();
        if external_id.is_empty() {
            return Err("identity key id must not be empty".to_string());
        }
        if external_id.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(format!("identity key id contains whitespace: {:?}", external_id));
        }
        Ok(Self { source, external_id })
    }

    pub fn event(external_id: impl Into<String>) -> Result<Self, String> {
        Self::new(CatalogSource::Event, external_id)
    }

    pub fn music(external_id: impl Into<String>) -> Result<Self, String> {
        Self::new(CatalogSource::Music, external_id)
    }

    pub fn source(&self) -> CatalogSource {
        self.source
    }

    pub fn external_id(&self) -> &str {
        &self.external_id
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source.as_str(), self.external_id)
    }
}

impl FromStr for IdentityKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (source, id) = s
            .split_once(':')
            .ok_or_else(|| format!("identity key must look like <source>:<id>, got {:?}", s))?;
        let source = match source.trim() {
            "event" => CatalogSource::Event,
            "music" => CatalogSource::Music,
            other => return Err(format!("unknown identity source {:?}", other)),
        };
        IdentityKey::new(source, id)
    }
}

impl Serialize for IdentityKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Accepts either `"event:ID"` or `{"source": "event", "id": "ID"}`
impl<'de> Deserialize<'de> for IdentityKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Text(String),
            Parts { source: CatalogSource, id: String },
        }

        match Repr::deserialize(deserializer)? {
            Repr::Text(text) => text.parse().map_err(serde::de::Error::custom),
            Repr::Parts { source, id } => {
                IdentityKey::new(source, id).map_err(serde::de::Error::custom)
            }
        }
    }
}
