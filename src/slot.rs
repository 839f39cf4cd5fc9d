use crate::line::StationId;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;

/// A logical audio position along a line.
///
/// The string form of a key is a stable contract shared with the host's
/// undo/redo history:
///
/// - `station:<id>`
/// - `between:<a>-<b>`
/// - `between:<a>-<b>:segment:<millis>`
///
/// Station ids must not contain `:` or `-`; the map editor enforces that.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SlotKey {
    /// One announcement per visited station.
    Station(StationId),
    /// One per consecutive station pair on the line.
    Between(StationId, StationId),
    /// User-inserted segment nested under a between slot, ordered by the
    /// creation timestamp in its between slot's list.
    Segment(StationId, StationId, i64),
}

impl SlotKey {
    pub fn station(id: &str) -> Self {
        SlotKey::Station(id.to_string())
    }

    pub fn between(a: &str, b: &str) -> Self {
        SlotKey::Between(a.to_string(), b.to_string())
    }

    pub fn segment(a: &str, b: &str, created_millis: i64) -> Self {
        SlotKey::Segment(a.to_string(), b.to_string(), created_millis)
    }

    /// The stable string form of this key.
    pub fn key(&self) -> String {
        self.to_string()
    }

    /// Parse a key from its stable string form.
    pub fn parse(s: &str) -> Result<Self, String> {
        if let Some(id) = s.strip_prefix("station:") {
            if id.is_empty() {
                return Err(format!("Empty station id in slot key '{}'", s));
            }
            return Ok(SlotKey::Station(id.to_string()));
        }
        let rest = s
            .strip_prefix("between:")
            .ok_or_else(|| format!("Unrecognized slot key '{}'", s))?;
        let (pair, segment) = match rest.split_once(":segment:") {
            Some((pair, ts)) => {
                let millis = ts
                    .parse::<i64>()
                    .map_err(|_| format!("Bad segment timestamp in slot key '{}'", s))?;
                (pair, Some(millis))
            }
            None => (rest, None),
        };
        let (a, b) = pair
            .split_once('-')
            .ok_or_else(|| format!("Bad station pair in slot key '{}'", s))?;
        if a.is_empty() || b.is_empty() {
            return Err(format!("Bad station pair in slot key '{}'", s));
        }
        Ok(match segment {
            Some(millis) => SlotKey::segment(a, b, millis),
            None => SlotKey::between(a, b),
        })
    }

    /// The between slot a segment belongs to; `None` for non-segment keys.
    pub fn parent_between(&self) -> Option<SlotKey> {
        match self {
            SlotKey::Segment(a, b, _) => Some(SlotKey::between(a, b)),
            _ => None,
        }
    }

    /// The station this slot announces, if it is a station slot.
    pub fn station_id(&self) -> Option<&str> {
        match self {
            SlotKey::Station(id) => Some(id),
            _ => None,
        }
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotKey::Station(id) => write!(f, "station:{}", id),
            SlotKey::Between(a, b) => write!(f, "between:{}-{}", a, b),
            SlotKey::Segment(a, b, ts) => write!(f, "between:{}-{}:segment:{}", a, b, ts),
        }
    }
}

// Keys serialize as their stable string form so the JSON state file and the
// host's undo/redo history share one representation.
impl Serialize for SlotKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.key())
    }
}

struct SlotKeyVisitor;

impl<'de> Visitor<'de> for SlotKeyVisitor {
    type Value = SlotKey;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a slot key string")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<SlotKey, E> {
        SlotKey::parse(v).map_err(de::Error::custom)
    }
}

impl<'de> Deserialize<'de> for SlotKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<SlotKey, D::Error> {
        deserializer.deserialize_str(SlotKeyVisitor)
    }
}

/// Where an assigned clip comes from. Upload and Generated entries own a
/// revocable `clip://` resource in the `ClipStore`; Preset entries reference
/// bundled files and own nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ClipSource {
    Preset { path: PathBuf },
    Upload { url: String },
    Generated { url: String },
}

/// A clip bound to exactly one slot key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioAssignment {
    pub source: ClipSource,
    pub display_name: String,
}

impl AudioAssignment {
    pub fn preset(path: PathBuf, display_name: &str) -> Self {
        AudioAssignment {
            source: ClipSource::Preset { path },
            display_name: display_name.to_string(),
        }
    }

    pub fn upload(url: String, display_name: &str) -> Self {
        AudioAssignment {
            source: ClipSource::Upload { url },
            display_name: display_name.to_string(),
        }
    }

    pub fn generated(url: String, display_name: &str) -> Self {
        AudioAssignment {
            source: ClipSource::Generated { url },
            display_name: display_name.to_string(),
        }
    }

    /// Short tag naming the source kind.
    pub fn kind_label(&self) -> &'static str {
        match &self.source {
            ClipSource::Preset { .. } => "preset",
            ClipSource::Upload { .. } => "upload",
            ClipSource::Generated { .. } => "generated",
        }
    }

    /// Label shown in slot listings.
    pub fn display_label(&self) -> String {
        match &self.source {
            ClipSource::Preset { .. } => self.display_name.clone(),
            ClipSource::Upload { .. } => format!("{} (upload)", self.display_name),
            ClipSource::Generated { .. } => format!("{} (generated)", self.display_name),
        }
    }

    /// The revocable resource this assignment owns, if any. Preset clips are
    /// bundled files and are never released.
    pub fn owned_url(&self) -> Option<&str> {
        match &self.source {
            ClipSource::Preset { .. } => None,
            ClipSource::Upload { url } => Some(url),
            ClipSource::Generated { url } => Some(url),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn station_key_round_trips() {
        let key = SlotKey::station("s12");
        assert_eq!(key.key(), "station:s12");
        assert_eq!(SlotKey::parse("station:s12").unwrap(), key);
    }

    #[test]
    fn between_key_round_trips() {
        let key = SlotKey::between("s1", "s2");
        assert_eq!(key.key(), "between:s1-s2");
        assert_eq!(SlotKey::parse("between:s1-s2").unwrap(), key);
    }

    #[test]
    fn segment_key_round_trips() {
        let key = SlotKey::segment("s1", "s2", 1722945600123);
        assert_eq!(key.key(), "between:s1-s2:segment:1722945600123");
        assert_eq!(SlotKey::parse(&key.key()).unwrap(), key);
    }

    #[test]
    fn parse_rejects_malformed_keys() {
        assert!(SlotKey::parse("").is_err());
        assert!(SlotKey::parse("station:").is_err());
        assert!(SlotKey::parse("between:s1").is_err());
        assert!(SlotKey::parse("between:s1-").is_err());
        assert!(SlotKey::parse("between:s1-s2:segment:abc").is_err());
        assert!(SlotKey::parse("gap:s1-s2").is_err());
    }

    #[test]
    fn segment_parent_is_its_between_slot() {
        let seg = SlotKey::segment("s1", "s2", 7);
        assert_eq!(seg.parent_between(), Some(SlotKey::between("s1", "s2")));
        assert!(SlotKey::station("s1").parent_between().is_none());
    }

    #[test]
    fn station_id_only_for_station_slots() {
        assert_eq!(SlotKey::station("s9").station_id(), Some("s9"));
        assert!(SlotKey::between("a", "b").station_id().is_none());
        assert!(SlotKey::segment("a", "b", 1).station_id().is_none());
    }

    #[test]
    fn keys_serialize_as_strings() {
        let key = SlotKey::between("a", "b");
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"between:a-b\"");
        let back: SlotKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn owned_url_only_for_revocable_kinds() {
        let preset = AudioAssignment::preset(PathBuf::from("chime.mp3"), "Chime");
        let upload = AudioAssignment::upload("clip://u1".into(), "Door warning");
        let generated = AudioAssignment::generated("clip://g1".into(), "Next stop");
        assert!(preset.owned_url().is_none());
        assert_eq!(upload.owned_url(), Some("clip://u1"));
        assert_eq!(generated.owned_url(), Some("clip://g1"));
    }

    #[test]
    fn display_label_marks_source_kind() {
        let upload = AudioAssignment::upload("clip://u1".into(), "Door warning");
        assert_eq!(upload.display_label(), "Door warning (upload)");
        let preset = AudioAssignment::preset(PathBuf::from("chime.mp3"), "Chime");
        assert_eq!(preset.display_label(), "Chime");
    }

    #[test]
    fn assignment_serde_tags_kind() {
        let upload = AudioAssignment::upload("clip://u1".into(), "Doors");
        let json = serde_json::to_string(&upload).unwrap();
        assert!(json.contains("\"kind\":\"upload\""));
        let back: AudioAssignment = serde_json::from_str(&json).unwrap();
        assert_eq!(back, upload);
    }
}
