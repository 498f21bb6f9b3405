//! Error taxonomy for the DataModel decode pipeline (spec §7).

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum PbixError {
    /// The XPress9 codec refused to initialize.
    DecompressInit,
    /// A structural header (XPress9 stream header, ABF `BackupLogHeader`) is
    /// missing a required field.
    MalformedHeader(String),
    /// `metadata.sqlitedb` does not start with the SQLite magic header.
    InvalidSqlite(String),
    /// A requested file basename is absent from the ABF file log.
    FileNotFound(String),
    /// A row set required to build the schema is absent (e.g. no `Table` rows).
    IncompleteMetadata(String),
    /// A column failed to decode; non-fatal, the column is dropped from the table.
    ColumnDecodeSkipped(String),
    /// A streaming extraction was aborted by an epoch mismatch.
    Cancelled,
    /// Any other structural violation not covered by a named variant above.
    OutOfSpec(String),
}

impl std::error::Error for PbixError {}

impl std::fmt::Display for PbixError {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            PbixError::DecompressInit => write!(fmt, "XPress9 codec failed to initialize"),
            PbixError::MalformedHeader(msg) => write!(fmt, "malformed header: {msg}"),
            PbixError::InvalidSqlite(msg) => write!(fmt, "invalid sqlite database: {msg}"),
            PbixError::FileNotFound(name) => write!(fmt, "file not found in ABF log: {name}"),
            PbixError::IncompleteMetadata(msg) => write!(fmt, "incomplete metadata: {msg}"),
            PbixError::ColumnDecodeSkipped(msg) => write!(fmt, "column decode skipped: {msg}"),
            PbixError::Cancelled => write!(fmt, "streaming extraction cancelled"),
            PbixError::OutOfSpec(msg) => write!(fmt, "{msg}"),
        }
    }
}

impl From<std::io::Error> for PbixError {
    fn from(e: std::io::Error) -> PbixError {
        PbixError::OutOfSpec(format!("underlying IO error: {e}"))
    }
}

impl From<quick_xml::Error> for PbixError {
    fn from(e: quick_xml::Error) -> PbixError {
        PbixError::MalformedHeader(format!("xml error: {e}"))
    }
}

/// A specialized `Result` for pbix decode errors.
pub type Result<T> = std::result::Result<T, PbixError>;

macro_rules! out_of_spec_err {
    ($fmt:expr) => ($crate::error::PbixError::OutOfSpec($fmt.to_owned()));
    ($fmt:expr, $($args:expr),*) => ($crate::error::PbixError::OutOfSpec(format!($fmt, $($args),*)));
}

macro_rules! malformed_err {
    ($fmt:expr) => ($crate::error::PbixError::MalformedHeader($fmt.to_owned()));
    ($fmt:expr, $($args:expr),*) => ($crate::error::PbixError::MalformedHeader(format!($fmt, $($args),*)));
}

pub(crate) use malformed_err;
pub(crate) use out_of_spec_err;
