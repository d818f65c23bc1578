//! Capability requirements and their validation against descriptor flags.

use crate::{
    error::{Error, Result},
    flags::DescriptorFlags,
};
use serde::{Deserialize, Serialize};
use std::{fmt, os::fd::RawFd};
use strum::{AsRefStr, Display, EnumIter, IntoEnumIterator, IntoStaticStr};
use tracing::trace;

#[derive(
    AsRefStr,
    Clone,
    Copy,
    Debug,
    Deserialize,
    Display,
    EnumIter,
    Eq,
    Hash,
    IntoStaticStr,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
/// A single fact about an open descriptor which can be required from it.
///
/// The declaration order is the order in which requirements are checked.
pub enum Capability {
    /// Reads and writes return instead of suspending the calling thread.
    NonBlocking,

    /// The descriptor was opened read-only or read-write.
    Readable,

    /// The descriptor was opened write-only or read-write.
    Writable,

    /// The descriptor is closed on `execve(2)`.
    CloseOnExec,
}

impl DescriptorFlags {
    /// Decide whether the flags satisfy a single capability.
    pub fn satisfies(&self, capability: Capability) -> bool {
        match capability {
            Capability::NonBlocking => self.non_blocking() || self.is_write_only_exempt(),
            Capability::Readable => self.is_readable(),
            Capability::Writable => self.is_writable(),
            Capability::CloseOnExec => self.close_on_exec(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
/// A set of [`Capability`] values.
pub struct Capabilities {
    non_blocking: bool,
    readable: bool,
    writable: bool,
    close_on_exec: bool,
}

impl Capabilities {
    /// No requirements at all.
    pub const NONE: Self = Self {
        non_blocking: false,
        readable: false,
        writable: false,
        close_on_exec: false,
    };

    /// A non-blocking reader.
    pub const READER: Self = Self {
        non_blocking: true,
        readable: true,
        ..Self::NONE
    };

    /// A non-blocking writer.
    pub const WRITER: Self = Self {
        non_blocking: true,
        writable: true,
        ..Self::NONE
    };

    /// A non-blocking reader and writer.
    pub const READ_WRITE: Self = Self {
        non_blocking: true,
        readable: true,
        writable: true,
        ..Self::NONE
    };

    /// A non-blocking reader and writer which does not leak into executed programs.
    pub const READ_WRITE_CLOSE: Self = Self {
        close_on_exec: true,
        ..Self::READ_WRITE
    };

    /// Return a copy of the set including `capability`.
    pub const fn with(mut self, capability: Capability) -> Self {
        match capability {
            Capability::NonBlocking => self.non_blocking = true,
            Capability::Readable => self.readable = true,
            Capability::Writable => self.writable = true,
            Capability::CloseOnExec => self.close_on_exec = true,
        }
        self
    }

    /// Whether the set includes `capability`.
    pub const fn contains(&self, capability: Capability) -> bool {
        match capability {
            Capability::NonBlocking => self.non_blocking,
            Capability::Readable => self.readable,
            Capability::Writable => self.writable,
            Capability::CloseOnExec => self.close_on_exec,
        }
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        *self == Self::NONE
    }

    /// Iterate the contained capabilities in check order.
    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::iter().filter(|c| self.contains(*c))
    }

    /// All capabilities the given flags satisfy.
    pub fn satisfied_by(flags: &DescriptorFlags) -> Self {
        Capability::iter()
            .filter(|c| flags.satisfies(*c))
            .collect()
    }
}

impl FromIterator<Capability> for Capabilities {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        iter.into_iter().fold(Self::NONE, Self::with)
    }
}

impl From<Capability> for Capabilities {
    fn from(capability: Capability) -> Self {
        Self::NONE.with(capability)
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&'static str> = self.iter().map(Into::into).collect();
        write!(f, "[{}]", names.join(", "))
    }
}

/// Check `flags` of descriptor `fd` against the `required` capabilities.
///
/// Stops at the first unmet requirement. A missing non-blocking mode is
/// reported as [`Error::NotNonBlocking`], every other missing capability as
/// [`Error::CapabilityMismatch`].
pub fn validate(fd: RawFd, flags: &DescriptorFlags, required: Capabilities) -> Result<()> {
    if let Some(missing) = required.iter().find(|c| !flags.satisfies(*c)) {
        trace!("Fd {} is missing capability {}", fd, missing);
        return Err(match missing {
            Capability::NonBlocking => Error::NotNonBlocking(fd),
            missing => Error::CapabilityMismatch { fd, missing },
        });
    }

    if flags.is_write_only_exempt() && required.contains(Capability::NonBlocking) {
        trace!("Accepting write-only fd {} without O_NONBLOCK", fd);
    }
    Ok(())
}
