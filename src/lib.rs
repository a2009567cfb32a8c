pub mod bitmap;
pub mod buffer;
pub mod checksum;
pub mod cli;
pub mod device;
pub mod image;
pub mod logging;
pub mod progress;
pub mod queue;
pub mod reader;
pub mod sector;
pub mod session;
pub mod worker;

pub use session::{run, SessionConfig, SessionError, SessionSummary, Verdict};
