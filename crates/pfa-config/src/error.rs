use std::fmt;

/// Configuration rejected before a cycle begins.
///
/// The engine never substitutes defaults for an invalid configured value;
/// every variant here is fatal to the cycle that carried it.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// The document did not match the typed schema (unknown key, wrong type,
    /// missing required key).
    Malformed(String),
    /// A field is present but out of range.
    InvalidField { field: String, reason: String },
    /// `universe.symbols` is empty.
    EmptyUniverse,
    /// A symbol appears more than once in the universe or holdings ledger.
    DuplicateSymbol { symbol: String },
    /// An entry of the sold ledger is invalid.
    InvalidSoldRecord { index: usize, reason: String },
}

impl ConfigError {
    pub(crate) fn field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(msg) => write!(f, "CONFIG_INVALID malformed: {msg}"),
            Self::InvalidField { field, reason } => {
                write!(f, "CONFIG_INVALID field={field}: {reason}")
            }
            Self::EmptyUniverse => write!(f, "CONFIG_INVALID universe.symbols must not be empty"),
            Self::DuplicateSymbol { symbol } => {
                write!(f, "CONFIG_INVALID duplicate symbol '{symbol}'")
            }
            Self::InvalidSoldRecord { index, reason } => {
                write!(f, "CONFIG_INVALID sold[{index}]: {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
