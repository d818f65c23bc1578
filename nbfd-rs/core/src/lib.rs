#![allow(clippy::needless_return)]
#![doc = include_str!("../../../README.md")]
#![cfg(unix)]

pub use capability::{Capabilities, Capability, validate};
pub use error::{Error, Result};
pub use fifo::{Fifo, create_fifo};
pub use flags::{AccessMode, DescriptorFlags, query_flags, set_non_blocking, set_non_blocking_raw};
pub use handle::NonBlockingFd;
pub use readiness::{DefaultReadiness, Interest, ReadinessImpl, ReadinessWait};

mod capability;
mod error;
mod fifo;
mod flags;
mod handle;
mod readiness;
