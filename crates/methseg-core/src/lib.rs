#![doc = include_str!("../README.md")]

mod common;
mod listing;
mod partition;
mod shard;
mod template;

pub use common::*;
pub use listing::*;
pub use partition::*;
pub use shard::*;
pub use template::*;
