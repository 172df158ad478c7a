pub mod hull;
pub mod measurement;
pub mod mesh;
pub mod pipeline;
pub mod queue;
pub mod reconstruction;
