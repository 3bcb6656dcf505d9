//! Stdout demultiplexing: accumulate raw bytes into newline-delimited
//! frames ([`line_framer`]) and classify each frame as telemetry, response,
//! or malformed ([`classifier`]).

pub mod classifier;
pub mod line_framer;

pub use classifier::{classify, Classified};
pub use line_framer::{IngestResult, LineFramer};
