use std::fmt::{self, Display};

/// Reasons a [`FormatSpec`](crate::FormatSpec) is rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum FormatSpecError {
    EmptyName,
    /// The name is used as a directory component and must not escape it.
    InvalidName(String),
    QualityOutOfRange(f32),
}

impl Display for FormatSpecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatSpecError::EmptyName => f.write_str("format name is empty"),
            FormatSpecError::InvalidName(name) => write!(
                f,
                "format name '{name}' is not a valid single path component"
            ),
            FormatSpecError::QualityOutOfRange(q) => {
                write!(f, "compression quality {q} is outside [0, 1]")
            }
        }
    }
}

impl std::error::Error for FormatSpecError {}
