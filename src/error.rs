use std::fmt;

pub(crate) type TintaResult<T> = Result<T, Error>;

/// Errors that can occur when building grammars and themes.
///
/// Tokenizing a line never fails: malformed regexes, selectors and grammars that loop
/// degrade to "no match" and are only logged.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// JSON parsing failed when loading a grammar or a theme through the JSON helpers.
    Json(serde_json::Error),

    /// No grammar is available for the scope we were asked to tokenize with.
    GrammarNotFound(String),

    /// A theme used a color missing from the fixed palette given to the color map.
    MissingColor(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Json(err) => write!(f, "JSON parsing error: {}", err),
            Error::GrammarNotFound(name) => write!(f, "no grammar provided for <{}>", name),
            Error::MissingColor(color) => write!(f, "missing color in color map: {}", color),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Json(err) => Some(err),
            Error::GrammarNotFound(_) | Error::MissingColor(_) => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}
