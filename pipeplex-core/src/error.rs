use std::fmt;

use thiserror::Error;

/// Externally assigned table identifier.
pub type Oid = u32;

/// Step of the per-oid pipe protocol that was in progress when an error surfaced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    CreatePipe,
    OpenPipe,
    OpenDestination,
    OpenSource,
    Skip,
    Copy,
    ClosePipe,
    RemovePipe,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::CreatePipe => "create pipe",
            Phase::OpenPipe => "open pipe",
            Phase::OpenDestination => "open destination",
            Phase::OpenSource => "open source",
            Phase::Skip => "skip",
            Phase::Copy => "copy",
            Phase::ClosePipe => "close pipe",
            Phase::RemovePipe => "remove pipe",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum HelperError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("TOC error: {0}")]
    Toc(String),

    #[error("TOC already has an entry for oid {0}")]
    DuplicateEntry(Oid),

    #[error("TOC has no entry for oid {0}")]
    MissingEntry(Oid),

    #[error("Plugin error: {0}")]
    Upstream(String),

    #[error("Terminated due to user request")]
    Cancelled,

    #[error("oid {oid}: {phase}: {source}")]
    AtOid {
        oid: Oid,
        phase: Phase,
        #[source]
        source: Box<HelperError>,
    },
}

impl HelperError {
    /// Error category, looking through oid annotations.
    pub fn code(&self) -> &'static str {
        match self {
            HelperError::Io(_) => "IO",
            HelperError::Config(_)
            | HelperError::Toc(_)
            | HelperError::DuplicateEntry(_)
            | HelperError::MissingEntry(_) => "CONFIG",
            HelperError::Upstream(_) => "UPSTREAM",
            HelperError::Cancelled => "CANCELLED",
            HelperError::AtOid { source, .. } => source.code(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.code() == "CANCELLED"
    }

    pub fn at(self, oid: Oid, phase: Phase) -> Self {
        HelperError::AtOid {
            oid,
            phase,
            source: Box::new(self),
        }
    }
}

/// Attach the oid and phase to any fallible step.
pub trait OidContext<T> {
    fn at_oid(self, oid: Oid, phase: Phase) -> Result<T>;
}

impl<T, E: Into<HelperError>> OidContext<T> for std::result::Result<T, E> {
    fn at_oid(self, oid: Oid, phase: Phase) -> Result<T> {
        self.map_err(|e| e.into().at(oid, phase))
    }
}

// Convenient crate-wide result type
pub type Result<T> = std::result::Result<T, HelperError>;
