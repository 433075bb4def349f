//! Column registry - what the viewer can show for each mirrored node.
//!
//! Columns are plain data: a closed [`ColumnId`] dispatches to the accessor,
//! the registry only fixes order, labels and defaults.
//!
//! Frame-percentage columns and load severity are derived at read time from
//! the engine's current frame interval, not stored with the sample.

use std::cmp::Ordering;

use super::metrics::ns_to_ms;
use super::mirror::MirrorNode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnId {
    Name,
    Type,
    Active,
    Rendered,
    Enabled,
    Tick,
    TickMax,
    TickFrame,
    Render,
    RenderMax,
    RenderSum,
    RenderFrame,
    RenderGpu,
    RenderGpuMax,
    RenderGpuSum,
    RenderGpuFrame,
    AsyncFps,
    AsyncBest,
    AsyncWorst,
    RenderedFps,
    RenderedBest,
    RenderedWorst,
    Descendants,
}

impl ColumnId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnId::Name => "name",
            ColumnId::Type => "type",
            ColumnId::Active => "active",
            ColumnId::Rendered => "rendered",
            ColumnId::Enabled => "enabled",
            ColumnId::Tick => "tick",
            ColumnId::TickMax => "tick_max",
            ColumnId::TickFrame => "tick_frame",
            ColumnId::Render => "render",
            ColumnId::RenderMax => "render_max",
            ColumnId::RenderSum => "render_sum",
            ColumnId::RenderFrame => "render_frame",
            ColumnId::RenderGpu => "render_gpu",
            ColumnId::RenderGpuMax => "render_gpu_max",
            ColumnId::RenderGpuSum => "render_gpu_sum",
            ColumnId::RenderGpuFrame => "render_gpu_frame",
            ColumnId::AsyncFps => "async_fps",
            ColumnId::AsyncBest => "async_best",
            ColumnId::AsyncWorst => "async_worst",
            ColumnId::RenderedFps => "rendered_fps",
            ColumnId::RenderedBest => "rendered_best",
            ColumnId::RenderedWorst => "rendered_worst",
            ColumnId::Descendants => "descendants",
        }
    }

    fn is_gpu(&self) -> bool {
        matches!(
            self,
            ColumnId::RenderGpu | ColumnId::RenderGpuMax | ColumnId::RenderGpuSum | ColumnId::RenderGpuFrame
        )
    }
}

impl std::str::FromStr for ColumnId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = s.trim().to_ascii_lowercase().replace('-', "_");
        STANDARD_COLUMNS
            .iter()
            .map(|c| c.id)
            .find(|id| id.as_str() == norm)
            .ok_or_else(|| format!("unknown column '{}'", s))
    }
}

/// Value type tag, drives formatting and comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Default,
    Boolean,
    Duration,
    Percentage,
    Fps,
    Count,
}

/// One cell
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    /// Root or unknown node: no data
    Empty,
    /// Column does not apply to this node (e.g. FPS of a filter)
    NotApplicable,
    Text(String),
    Bool(bool),
    /// Nanoseconds
    Duration(u64),
    Percentage(f64),
    Fps(f64),
    Count(u64),
}

impl CellValue {
    /// Display string
    pub fn display(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::NotApplicable => "N/A".to_string(),
            CellValue::Text(s) => s.clone(),
            CellValue::Bool(b) => (if *b { "yes" } else { "no" }).to_string(),
            CellValue::Duration(ns) => format!("{:.2} ms", ns_to_ms(*ns)),
            CellValue::Percentage(p) => format!("{:.1} %", p),
            CellValue::Fps(fps) => format!("{:.2}", fps),
            CellValue::Count(n) => n.to_string(),
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            CellValue::Duration(ns) => Some(*ns as f64),
            CellValue::Percentage(v) | CellValue::Fps(v) => Some(*v),
            CellValue::Count(n) => Some(*n as f64),
            _ => None,
        }
    }

    /// Type-aware ordering: numbers numerically, text case-folded.
    ///
    /// Cells without data sort before everything else.
    pub fn compare(&self, other: &CellValue) -> Ordering {
        match (self, other) {
            (CellValue::Text(a), CellValue::Text(b)) => collate(a, b),
            _ => match (self.as_number(), other.as_number()) {
                (Some(a), Some(b)) => a.total_cmp(&b),
                (Some(_), None) => Ordering::Greater,
                (None, Some(_)) => Ordering::Less,
                (None, None) => self.rank().cmp(&other.rank()),
            },
        }
    }

    fn rank(&self) -> u8 {
        match self {
            CellValue::Empty => 0,
            CellValue::NotApplicable => 1,
            _ => 2,
        }
    }
}

/// Human ordering for names: case-insensitive first, raw text breaks ties
pub fn collate(a: &str, b: &str) -> Ordering {
    a.to_lowercase().cmp(&b.to_lowercase()).then_with(|| a.cmp(b))
}

/// Read-time inputs for derived columns
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueContext {
    /// Target frame interval in nanoseconds
    pub frame_interval_ns: u64,
}

impl ValueContext {
    fn frame_percent(&self, ns: u64) -> f64 {
        if self.frame_interval_ns == 0 {
            return 0.0;
        }
        ns as f64 / self.frame_interval_ns as f64 * 100.0
    }
}

/// How close a duration is to the frame budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Normal,
    /// At least a quarter of the frame interval
    Elevated,
    /// At least half
    High,
    /// Full frame interval or more
    Critical,
}

/// Immutable column description
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColumnSpec {
    pub id: ColumnId,
    pub label: &'static str,
    pub ty: ColumnType,
    pub default_hidden: bool,
    /// Numeric columns sort worst-first by default
    pub sort_desc: bool,
}

impl ColumnSpec {
    const fn new(id: ColumnId, label: &'static str, ty: ColumnType, default_hidden: bool) -> Self {
        Self {
            id,
            label,
            ty,
            default_hidden,
            sort_desc: !matches!(ty, ColumnType::Default),
        }
    }

    /// Extract this column from a node
    pub fn value(&self, node: &MirrorNode, ctx: &ValueContext) -> CellValue {
        if node.is_root() {
            return CellValue::Empty;
        }

        let m = node.metrics();
        let flags = node.flags();
        let async_only = |v: CellValue| if node.is_async() { v } else { CellValue::NotApplicable };

        match self.id {
            ColumnId::Name => CellValue::Text(node.name().to_string()),
            ColumnId::Type => CellValue::Text(node.type_label().to_string()),
            ColumnId::Active => CellValue::Bool(flags.active),
            ColumnId::Rendered => CellValue::Bool(flags.rendered),
            ColumnId::Enabled => CellValue::Bool(flags.enabled),
            ColumnId::Tick => CellValue::Duration(m.tick_avg),
            ColumnId::TickMax => CellValue::Duration(m.tick_max),
            ColumnId::TickFrame => CellValue::Percentage(ctx.frame_percent(m.tick_avg)),
            ColumnId::Render => CellValue::Duration(m.render_avg),
            ColumnId::RenderMax => CellValue::Duration(m.render_max),
            ColumnId::RenderSum => CellValue::Duration(m.render_sum),
            ColumnId::RenderFrame => CellValue::Percentage(ctx.frame_percent(m.render_avg)),
            ColumnId::RenderGpu => CellValue::Duration(m.gpu_render_avg),
            ColumnId::RenderGpuMax => CellValue::Duration(m.gpu_render_max),
            ColumnId::RenderGpuSum => CellValue::Duration(m.gpu_render_sum),
            ColumnId::RenderGpuFrame => CellValue::Percentage(ctx.frame_percent(m.gpu_render_avg)),
            ColumnId::AsyncFps => async_only(CellValue::Fps(m.async_input_fps)),
            ColumnId::AsyncBest => async_only(CellValue::Duration(m.async_input_best)),
            ColumnId::AsyncWorst => async_only(CellValue::Duration(m.async_input_worst)),
            ColumnId::RenderedFps => async_only(CellValue::Fps(m.async_rendered_fps)),
            ColumnId::RenderedBest => async_only(CellValue::Duration(m.async_rendered_best)),
            ColumnId::RenderedWorst => async_only(CellValue::Duration(m.async_rendered_worst)),
            ColumnId::Descendants => CellValue::Count(node.descendants() as u64),
        }
    }

    /// Load severity for the tick/render/GPU columns, Normal elsewhere.
    ///
    /// Judged on the worst-case (max) duration against the frame interval.
    pub fn severity(&self, node: &MirrorNode, ctx: &ValueContext) -> Severity {
        if node.is_root() || ctx.frame_interval_ns == 0 {
            return Severity::Normal;
        }
        let m = node.metrics();
        let worst = match self.id {
            ColumnId::Tick | ColumnId::TickMax | ColumnId::TickFrame => m.tick_max,
            ColumnId::Render | ColumnId::RenderMax | ColumnId::RenderFrame => m.render_max,
            ColumnId::RenderGpu | ColumnId::RenderGpuMax | ColumnId::RenderGpuFrame => m.gpu_render_max,
            _ => return Severity::Normal,
        };

        let target = ctx.frame_interval_ns as f64;
        let worst = worst as f64;
        if worst >= target {
            Severity::Critical
        } else if worst >= target * 0.5 {
            Severity::High
        } else if worst >= target * 0.25 {
            Severity::Elevated
        } else {
            Severity::Normal
        }
    }
}

const STANDARD_COLUMNS: [ColumnSpec; 23] = [
    ColumnSpec::new(ColumnId::Name, "Name", ColumnType::Default, false),
    ColumnSpec::new(ColumnId::Type, "Type", ColumnType::Default, false),
    ColumnSpec::new(ColumnId::Active, "Active", ColumnType::Boolean, false),
    ColumnSpec::new(ColumnId::Rendered, "Rendered", ColumnType::Boolean, true),
    ColumnSpec::new(ColumnId::Enabled, "Enabled", ColumnType::Boolean, false),
    ColumnSpec::new(ColumnId::Tick, "Tick", ColumnType::Duration, false),
    ColumnSpec::new(ColumnId::TickMax, "Tick Max", ColumnType::Duration, true),
    ColumnSpec::new(ColumnId::TickFrame, "Tick %", ColumnType::Percentage, true),
    ColumnSpec::new(ColumnId::Render, "Render", ColumnType::Duration, false),
    ColumnSpec::new(ColumnId::RenderMax, "Render Max", ColumnType::Duration, true),
    ColumnSpec::new(ColumnId::RenderSum, "Render Total", ColumnType::Duration, true),
    ColumnSpec::new(ColumnId::RenderFrame, "Render %", ColumnType::Percentage, false),
    ColumnSpec::new(ColumnId::RenderGpu, "GPU", ColumnType::Duration, false),
    ColumnSpec::new(ColumnId::RenderGpuMax, "GPU Max", ColumnType::Duration, true),
    ColumnSpec::new(ColumnId::RenderGpuSum, "GPU Total", ColumnType::Duration, true),
    ColumnSpec::new(ColumnId::RenderGpuFrame, "GPU %", ColumnType::Percentage, false),
    ColumnSpec::new(ColumnId::AsyncFps, "FPS", ColumnType::Fps, false),
    ColumnSpec::new(ColumnId::AsyncBest, "Frame Best", ColumnType::Duration, true),
    ColumnSpec::new(ColumnId::AsyncWorst, "Frame Worst", ColumnType::Duration, true),
    ColumnSpec::new(ColumnId::RenderedFps, "Rendered FPS", ColumnType::Fps, false),
    ColumnSpec::new(ColumnId::RenderedBest, "Rendered Best", ColumnType::Duration, true),
    ColumnSpec::new(ColumnId::RenderedWorst, "Rendered Worst", ColumnType::Duration, true),
    ColumnSpec::new(ColumnId::Descendants, "Children", ColumnType::Count, true),
];

/// Ordered, immutable list of columns
#[derive(Debug, Clone)]
pub struct ColumnRegistry {
    columns: Vec<ColumnSpec>,
}

impl Default for ColumnRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl ColumnRegistry {
    /// Standard set for this platform (no GPU timing on macOS)
    pub fn standard() -> Self {
        Self::new(!cfg!(target_os = "macos"))
    }

    pub fn new(gpu: bool) -> Self {
        let columns = STANDARD_COLUMNS
            .iter()
            .filter(|c| gpu || !c.id.is_gpu())
            .copied()
            .collect();
        Self { columns }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ColumnSpec> {
        self.columns.get(index)
    }

    pub fn spec(&self, id: ColumnId) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.id == id)
    }

    pub fn index_of(&self, id: ColumnId) -> Option<usize> {
        self.columns.iter().position(|c| c.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.columns.iter()
    }

    pub fn default_hidden(&self) -> Vec<ColumnId> {
        self.columns.iter().filter(|c| c.default_hidden).map(|c| c.id).collect()
    }
}
