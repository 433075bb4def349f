//! View modes - which slice of the engine graph gets mirrored.

use std::fmt;
use std::str::FromStr;

use super::engine::{Source, SourceKind};

/// Projection of the engine graph into the mirror tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewMode {
    /// Top-level scenes, one level of members
    #[default]
    Scene,
    /// Top-level scenes with nested scenes expanded in place
    SceneNested,
    /// Every public input source
    Source,
    /// Every filter, labelled with its owner
    Filter,
    /// Every transition and its active leg
    Transition,
    /// Everything
    All,
}

impl ViewMode {
    pub const MODES: [ViewMode; 6] = [
        ViewMode::Scene,
        ViewMode::SceneNested,
        ViewMode::Source,
        ViewMode::Filter,
        ViewMode::Transition,
        ViewMode::All,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ViewMode::Scene => "scene",
            ViewMode::SceneNested => "scene-nested",
            ViewMode::Source => "source",
            ViewMode::Filter => "filter",
            ViewMode::Transition => "transition",
            ViewMode::All => "all",
        }
    }

    /// Whether `source` is listed at the top level in this mode.
    ///
    /// Activity is checked separately (active-only toggle).
    pub fn accepts_root(&self, source: &dyn Source) -> bool {
        let kind = source.kind();
        match self {
            ViewMode::Scene | ViewMode::SceneNested => kind == SourceKind::Scene,
            ViewMode::Source => kind == SourceKind::Input && !source.is_private(),
            ViewMode::Filter => kind == SourceKind::Filter,
            ViewMode::Transition => kind == SourceKind::Transition,
            ViewMode::All => true,
        }
    }

    /// Nested scenes expand into their members
    pub fn expands_nested_scenes(&self) -> bool {
        !matches!(self, ViewMode::Scene | ViewMode::Filter)
    }

    /// Filters and transition legs are mirrored under their source
    pub fn descends(&self) -> bool {
        *self != ViewMode::Filter
    }

    /// Full-tree duplicate check before a nested scene is inserted
    pub fn dedups_nested_scenes(&self) -> bool {
        *self == ViewMode::SceneNested
    }

    /// Root filters are shown as "Owner / Filter"
    pub fn qualifies_filters(&self) -> bool {
        *self == ViewMode::Filter
    }
}

impl fmt::Display for ViewMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ViewMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = s.trim().to_ascii_lowercase().replace('_', "-");
        ViewMode::MODES
            .iter()
            .copied()
            .find(|m| m.as_str() == norm)
            .ok_or_else(|| {
                let names: Vec<&str> = ViewMode::MODES.iter().map(|m| m.as_str()).collect();
                format!("unknown view mode '{}' (expected one of: {})", s, names.join(", "))
            })
    }
}
