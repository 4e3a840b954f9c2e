use std::fmt;

use crate::site::CallSite;

/// Owned copy of a call site, kept around for diagnostics after the ledger borrow has ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct SiteName {
    pub file: String,
    pub line: u32,
}

impl From<CallSite<'_>> for SiteName {
    fn from(site: CallSite<'_>) -> Self {
        Self {
            file: site.file().to_owned(),
            line: site.line(),
        }
    }
}

impl fmt::Display for SiteName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {} in file {}", self.line, self.file)
    }
}

/// Where a pointer handed to the tracker lands inside some other live block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Interior {
    pub offset: usize,
    pub size: usize,
    pub site: SiteName,
}

/// Everything the tracker knows how to complain about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Fault {
    /// The underlying allocator could not provide a block.
    Exhaustion { requested: usize, site: SiteName },
    /// Free of an address that is not a live tracked block.
    UnknownFree { addr: usize },
    /// Reallocation of an address that is not a live tracked block.
    UnknownRealloc {
        addr: usize,
        site: SiteName,
        interior: Option<Interior>,
    },
    /// The canary after a block was overwritten.
    Overflow {
        addr: usize,
        size: usize,
        site: SiteName,
    },
}

impl Fault {
    #[cfg(any(test, feature = "tracing-compat"))]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Exhaustion { .. } => "exhaustion",
            Self::UnknownFree { .. } | Self::UnknownRealloc { .. } => "unknown_pointer",
            Self::Overflow { .. } => "overflow",
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhaustion { requested, site } => write!(
                f,
                "allocator returned no memory when trying to allocate {} bytes at {}",
                requested, site
            ),
            Self::UnknownFree { addr } => write!(
                f,
                "trying to free pointer {:#x}, which is not a live tracked allocation (double free?)",
                addr
            ),
            Self::UnknownRealloc {
                addr,
                site,
                interior,
            } => {
                write!(
                    f,
                    "trying to reallocate pointer {:#x} at {}; pointer has never been allocated",
                    addr, site
                )?;
                if let Some(interior) = interior {
                    write!(
                        f,
                        "; it points {} bytes (out of {}) into the allocation made at {}",
                        interior.offset, interior.size, interior.site
                    )?;
                }
                Ok(())
            }
            Self::Overflow { addr, size, site } => write!(
                f,
                "overshoot at {} (block {:#x} of {} bytes)",
                site, addr, size
            ),
        }
    }
}

/// Writes a diagnostic for `fault` to standard error, and to `tracing` when enabled.
pub(crate) fn emit(fault: &Fault) {
    eprintln!("MEM ERROR: {}", fault);

    #[cfg(feature = "tracing-compat")]
    tracing::error!(kind = fault.kind(), "{}", fault);
}

/// Reports `fault` and aborts the process.
///
/// Callers must have released every lock they hold before getting here.
pub(crate) fn terminate(fault: &Fault) -> ! {
    emit(fault);
    std::process::abort()
}

/// Aborts the process in place of a normal exit.
///
/// Meant as a drop-in for [`std::process::exit`] while debugging: instead of unwinding out quietly with an exit code,
/// the process dies abnormally so that an attached debugger stops right here, with the stack that led to the exit
/// still intact.
pub fn crash_exit(code: i32) -> ! {
    eprintln!("crash exit requested (exit code {})", code);

    #[cfg(feature = "tracing-compat")]
    tracing::debug!(code, "crash exit requested");

    std::process::abort()
}
