pub mod job;
pub mod style;
