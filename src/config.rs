/// Engine-level limits and timeouts.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Per-loop infinite-loop guard.
    pub max_loop_iterations: usize,
    /// Total executed-node guard per run.
    pub max_steps: i32,
    /// Age of a `Running` row's last update before it counts as stalled.
    pub stall_timeout_secs: u64,
    /// Replay happens at most this many times per execution.
    pub max_retry_count: i32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_loop_iterations: 100,
            max_steps: 500,
            stall_timeout_secs: 600,
            max_retry_count: 1,
        }
    }
}
