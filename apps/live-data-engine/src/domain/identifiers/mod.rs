//! Identifier Value Types
//!
//! Strongly-typed, validated identifiers for every trading object the data
//! engine touches. Each identifier is an immutable canonical string with
//! value equality and hashing, a lossless `Display`/`FromStr` round trip and
//! a debug form of `TypeName('<value>')`.
//!
//! A string is a valid identifier value when it is non-empty, not all
//! whitespace and entirely ASCII.

mod correlation_id;
mod instrument_id;
mod symbol;

pub use correlation_id::CorrelationId;
pub use instrument_id::InstrumentId;
pub use symbol::Symbol;

// =============================================================================
// Errors
// =============================================================================

/// Errors raised when parsing identifier or market data text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// The value was the empty string.
    #[error("invalid string for 'value', was empty")]
    Empty,

    /// The value contained only whitespace.
    #[error("invalid string for 'value', was all whitespace")]
    Whitespace,

    /// The value contained a non-ASCII character.
    #[error("invalid string for 'value', contained a non-ASCII char, was '{0}'")]
    NonAscii(String),

    /// An instrument id had no separator between symbol and venue.
    #[error(
        "Error parsing `InstrumentId` from '{0}': missing '.' separator between symbol and venue components"
    )]
    MissingSeparator(String),

    /// Structured text (bar specifications, correlation ids) was malformed.
    #[error("Error parsing `{type_name}` from '{value}': {reason}")]
    Invalid {
        /// Name of the type being parsed.
        type_name: &'static str,
        /// The offending input.
        value: String,
        /// Why the input was rejected.
        reason: String,
    },
}

impl ParseError {
    pub(crate) fn invalid(
        type_name: &'static str,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Invalid {
            type_name,
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Check that `value` is a valid identifier string.
///
/// # Errors
///
/// Returns [`ParseError`] naming the first rule the value breaks.
pub fn check_valid_string(value: &str) -> Result<(), ParseError> {
    if value.is_empty() {
        return Err(ParseError::Empty);
    }
    if !value.is_ascii() {
        return Err(ParseError::NonAscii(value.to_string()));
    }
    if value.chars().all(char::is_whitespace) {
        return Err(ParseError::Whitespace);
    }
    Ok(())
}

// =============================================================================
// Identifier Macro
// =============================================================================

macro_rules! define_identifier {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Create a new identifier, validating the value.
            ///
            /// # Errors
            ///
            /// Returns [`ParseError`](crate::domain::identifiers::ParseError)
            /// if the value is empty, all whitespace or non-ASCII.
            pub fn new(
                value: impl Into<String>,
            ) -> Result<Self, $crate::domain::identifiers::ParseError> {
                let value = value.into();
                $crate::domain::identifiers::check_valid_string(&value)?;
                Ok(Self(value))
            }

            /// Get the canonical string value.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume and return the inner string.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}('{}')", stringify!($name), self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::domain::identifiers::ParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = $crate::domain::identifiers::ParseError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl TryFrom<&str> for $name {
            type Error = $crate::domain::identifiers::ParseError;

            fn try_from(value: &str) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

pub(crate) use define_identifier;

define_identifier!(Venue, "A trading venue or data provider (e.g. `BINANCE`, `SIM`).");
define_identifier!(TraderId, "Identifier of a trader instance.");
define_identifier!(AccountId, "Identifier of a trading account.");
define_identifier!(
    ExecAlgorithmId,
    "Identifier of an execution algorithm (e.g. `VWAP`)."
);
define_identifier!(
    ClientId,
    "Identifier of a data client adapter registered with the engine."
);

// =============================================================================
// Tests
// =============================================================================
