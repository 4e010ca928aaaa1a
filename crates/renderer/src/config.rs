//! Scheduler settings in the units the frame loop works with.

use std::time::Duration;

use vkframe_core::EngineConfig;

use crate::pipeline_set::PipelineDesc;

/// Typed projection of [`EngineConfig`] for the [`FrameScheduler`](crate::FrameScheduler).
#[derive(Clone, Debug, PartialEq)]
pub struct SchedulerConfig {
    /// Number of ring slots (K).
    pub frames_in_flight: usize,
    pub fence_timeout_ns: u64,
    pub acquire_timeout_ns: u64,
    pub clear_color: [f32; 4],
    pub clear_depth: f32,
    /// Use MAILBOX presentation when the surface offers it.
    pub prefer_low_latency: bool,
    /// Pipelines in material-handle order.
    pub pipelines: Vec<PipelineDesc>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            fence_timeout_ns: duration_ns(Duration::from_secs(1)),
            acquire_timeout_ns: duration_ns(Duration::from_secs(1)),
            clear_color: [0.0, 0.0, 0.1, 1.0],
            clear_depth: 1.0,
            prefer_low_latency: true,
            pipelines: vec![PipelineDesc::mesh()],
        }
    }
}

impl SchedulerConfig {
    pub fn from_engine_config(config: &EngineConfig) -> Self {
        Self {
            frames_in_flight: config.frames.in_flight as usize,
            fence_timeout_ns: duration_ns(Duration::from_millis(config.frames.fence_timeout_ms)),
            acquire_timeout_ns: duration_ns(Duration::from_millis(
                config.frames.acquire_timeout_ms,
            )),
            clear_color: config.render.clear_color,
            clear_depth: 1.0,
            prefer_low_latency: config.surface.prefer_low_latency,
            pipelines: config.pipelines.iter().map(PipelineDesc::from).collect(),
        }
    }

    pub fn with_frames_in_flight(mut self, frames_in_flight: usize) -> Self {
        self.frames_in_flight = frames_in_flight;
        self
    }

    pub fn with_pipelines(mut self, pipelines: Vec<PipelineDesc>) -> Self {
        self.pipelines = pipelines;
        self
    }
}

fn duration_ns(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vkframe_core::PipelineConfig;

    #[test]
    fn test_defaults_match_engine_defaults() {
        let from_engine = SchedulerConfig::from_engine_config(&EngineConfig::default());
        assert_eq!(from_engine, SchedulerConfig::default());
    }

    #[test]
    fn test_converts_units_and_pipelines() {
        let mut engine = EngineConfig::default();
        engine.frames.in_flight = 3;
        engine.frames.fence_timeout_ms = 250;
        engine.render.clear_color = [0.5, 0.5, 0.5, 1.0];
        engine.pipelines.push(PipelineConfig {
            name: "unlit".to_string(),
            push_constants: false,
            ..PipelineConfig::mesh()
        });

        let config = SchedulerConfig::from_engine_config(&engine);

        assert_eq!(config.frames_in_flight, 3);
        assert_eq!(config.fence_timeout_ns, 250_000_000);
        assert_eq!(config.clear_color, [0.5, 0.5, 0.5, 1.0]);
        assert_eq!(config.pipelines.len(), 2);
        assert_eq!(config.pipelines[1].name, "unlit");
        assert!(config.pipelines[1].push_constants.is_none());
    }
}
