#[derive(Copy, Clone, PartialEq, Eq, Default, Debug)]
pub struct FrameStatistics {
    pub draw_calls: u64,
    pub primitives: u64,
    pub computes: u64,
    pub pipelines_built: u64,
    pub pipeline_binds: u64,
    pub batches: u64,
}
