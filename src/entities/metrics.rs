//! Metrics snapshot - one profiler sample for a single graph node.
//!
//! Durations are kept in the engine's native unit (nanoseconds), rates in
//! frames per second. Parents accumulate their children's snapshots during
//! the sampling pass, see [`MetricsSnapshot::aggregate`].

use serde::Serialize;

/// Raw profiler counters for one node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub tick_avg: u64,
    pub tick_max: u64,
    pub render_avg: u64,
    pub render_max: u64,
    pub render_sum: u64,
    pub gpu_render_avg: u64,
    pub gpu_render_max: u64,
    pub gpu_render_sum: u64,
    pub async_input_fps: f64,
    pub async_input_best: u64,
    pub async_input_worst: u64,
    pub async_rendered_fps: f64,
    pub async_rendered_best: u64,
    pub async_rendered_worst: u64,
}

impl MetricsSnapshot {
    /// All-zero snapshot (unsampled or stale node)
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::zero()
    }

    /// Combine a node's own sample with its children's contributions.
    ///
    /// Tick time is the node's own plus every child's. Render, GPU and async
    /// counters only ever come from filter children: a nested source can be
    /// composited under several parents, so its render cost must not roll up.
    /// When the node has filters, those counters are the sum over the filters
    /// alone, since the owner's own render sample already covers its filter
    /// chain. Without filters the node keeps its own render counters.
    pub fn aggregate(own: MetricsSnapshot, children: impl IntoIterator<Item = (MetricsSnapshot, bool)>) -> Self {
        let mut total = own;
        let mut filters: Option<MetricsSnapshot> = None;
        for (child, is_filter) in children {
            total.add_tick(&child);
            if is_filter {
                filters.get_or_insert_with(Self::zero).add_render(&child);
            }
        }
        if let Some(filters) = filters {
            total.take_render(&filters);
        }
        total
    }

    fn add_tick(&mut self, child: &MetricsSnapshot) {
        self.tick_avg = self.tick_avg.saturating_add(child.tick_avg);
        self.tick_max = self.tick_max.saturating_add(child.tick_max);
    }

    fn add_render(&mut self, child: &MetricsSnapshot) {
        self.render_avg = self.render_avg.saturating_add(child.render_avg);
        self.render_max = self.render_max.saturating_add(child.render_max);
        self.render_sum = self.render_sum.saturating_add(child.render_sum);
        self.gpu_render_avg = self.gpu_render_avg.saturating_add(child.gpu_render_avg);
        self.gpu_render_max = self.gpu_render_max.saturating_add(child.gpu_render_max);
        self.gpu_render_sum = self.gpu_render_sum.saturating_add(child.gpu_render_sum);
        self.async_input_fps += child.async_input_fps;
        self.async_input_best = self.async_input_best.saturating_add(child.async_input_best);
        self.async_input_worst = self.async_input_worst.saturating_add(child.async_input_worst);
        self.async_rendered_fps += child.async_rendered_fps;
        self.async_rendered_best = self.async_rendered_best.saturating_add(child.async_rendered_best);
        self.async_rendered_worst = self.async_rendered_worst.saturating_add(child.async_rendered_worst);
    }

    /// Everything but tick time from `other`
    fn take_render(&mut self, other: &MetricsSnapshot) {
        *self = MetricsSnapshot {
            tick_avg: self.tick_avg,
            tick_max: self.tick_max,
            ..*other
        };
    }
}

/// Nanoseconds to milliseconds for display
#[inline]
pub fn ns_to_ms(ns: u64) -> f64 {
    ns as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(tick: u64, render: u64) -> MetricsSnapshot {
        MetricsSnapshot {
            tick_avg: tick,
            tick_max: tick * 2,
            render_avg: render,
            render_max: render * 2,
            render_sum: render * 3,
            async_input_fps: 30.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_filters_replace_own_render() {
        let own = sample(10, 100);
        let total = MetricsSnapshot::aggregate(own, [(sample(1, 5), true), (sample(2, 7), true)]);

        assert_eq!(total.tick_avg, 13);
        assert_eq!(total.tick_max, 26);
        assert_eq!(total.render_avg, 12);
        assert_eq!(total.render_max, 24);
        assert_eq!(total.render_sum, 36);
        assert_eq!(total.async_input_fps, 60.0);
    }

    #[test]
    fn test_source_children_add_tick_only() {
        let own = sample(10, 100);
        let total = MetricsSnapshot::aggregate(own, [(sample(1, 5), false), (sample(3, 9), false)]);

        assert_eq!(total.tick_avg, 14);
        assert_eq!(total.render_avg, 100);
        assert_eq!(total.render_sum, 300);
        assert_eq!(total.async_input_fps, 30.0);
    }

    #[test]
    fn test_mixed_children() {
        let own = sample(10, 100);
        let total = MetricsSnapshot::aggregate(own, [(sample(1, 5), true), (sample(4, 50), false)]);

        assert_eq!(total.tick_avg, 15);
        // Only the filter counts; the nested source's 50 is left out
        assert_eq!(total.render_avg, 5);
        assert_eq!(total.render_sum, 15);
    }

    #[test]
    fn test_zero() {
        assert!(MetricsSnapshot::zero().is_zero());
        assert!(!sample(1, 0).is_zero());
        assert_eq!(ns_to_ms(2_500_000), 2.5);
    }
}
