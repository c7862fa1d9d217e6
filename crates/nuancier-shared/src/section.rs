//! The four fixed top-level catalog categories.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseEnumError;

/// A catalog section.  Every color group lives in exactly one section.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    #[default]
    Facades,
    Plans,
    Espaces,
    Ambiances,
}

impl Section {
    /// All sections in display order.
    pub const ALL: [Section; 4] = [
        Section::Facades,
        Section::Plans,
        Section::Espaces,
        Section::Ambiances,
    ];

    /// Value stored in the database and used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Section::Facades => "facades",
            Section::Plans => "plans",
            Section::Espaces => "espaces",
            Section::Ambiances => "ambiances",
        }
    }

    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Section::Facades => "Façades",
            Section::Plans => "Plans de travail",
            Section::Espaces => "Espaces de la maison",
            Section::Ambiances => "Ambiances",
        }
    }

    /// Lenient parse used for listing queries: trims, lower-cases and falls
    /// back to [`Section::Facades`] on anything unknown.
    pub fn parse_or_default(raw: Option<&str>) -> Self {
        raw.and_then(|s| s.trim().to_lowercase().parse().ok())
            .unwrap_or_default()
    }
}

impl FromStr for Section {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Section::ALL
            .into_iter()
            .find(|section| section.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("section", s))
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_known_sections() {
        for section in Section::ALL {
            assert_eq!(section.as_str().parse::<Section>().unwrap(), section);
        }
    }

    #[test]
    fn strict_parse_rejects_unknown() {
        let err = "cuisines".parse::<Section>().unwrap_err();
        assert_eq!(err.kind, "section");
    }

    #[test]
    fn lenient_parse_falls_back_to_facades() {
        assert_eq!(Section::parse_or_default(Some(" PLANS ")), Section::Plans);
        assert_eq!(Section::parse_or_default(Some("nope")), Section::Facades);
        assert_eq!(Section::parse_or_default(None), Section::Facades);
    }

    #[test]
    fn serde_uses_lowercase() {
        let json = serde_json::to_string(&Section::Ambiances).unwrap();
        assert_eq!(json, "\"ambiances\"");
    }
}
