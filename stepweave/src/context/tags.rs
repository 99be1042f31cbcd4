//! Observability tags attached to a step context.

use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

/// A key/value tag with a display colour.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    /// Tag key. Unique within a context.
    pub key: String,
    /// Tag value.
    pub value: String,
    /// Hex colour, e.g. `#1f2a3b`.
    #[serde(default)]
    pub color: String,
}

impl Tag {
    /// Creates a tag without colour. A colour is assigned when the tag is
    /// attached to a context.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            color: String::new(),
        }
    }

    /// Sets the colour.
    #[must_use]
    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();
        self
    }
}

fn palette() -> &'static Mutex<HashMap<(String, String), String>> {
    static PALETTE: OnceLock<Mutex<HashMap<(String, String), String>>> = OnceLock::new();
    PALETTE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Returns the colour for a tag, assigning a random one on first use.
///
/// The same key/value pair always gets the same colour within a process.
#[must_use]
pub fn tag_color(key: &str, value: &str) -> String {
    let mut palette = palette().lock();
    palette
        .entry((key.to_string(), value.to_string()))
        .or_insert_with(|| {
            let mut rng = rand::thread_rng();
            format!(
                "#{:02x}{:02x}{:02x}",
                rng.gen_range(64..=255u8),
                rng.gen_range(64..=255u8),
                rng.gen_range(64..=255u8)
            )
        })
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_is_stable() {
        let first = tag_color("matrix/os", "linux");
        let second = tag_color("matrix/os", "linux");
        assert_eq!(first, second);
        assert_eq!(first.len(), 7);
        assert!(first.starts_with('#'));
    }
}
