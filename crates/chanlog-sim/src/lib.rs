//! Load simulator for chanlog channel-log writers
//!
//! Feeds synthetic document changes through a
//! [`ChangesWriter`](chanlog_writer::ChangesWriter) from several concurrent
//! producers, checkpoints, then reads back every channel log and checks that
//! it is sorted by sequence.

pub mod config;
pub mod sim;

pub use config::{Cli, Command, RunArgs, SimConfig};
pub use sim::{ChannelSummary, SimReport, run};
