pub mod frame;
pub mod job;
pub mod prediction;
pub mod video;
