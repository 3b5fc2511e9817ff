use std::fmt;

use serde::{Deserialize, Serialize};

/// Why an item (or a whole run) failed.
///
/// `UnknownError` and `WrongStatusError` are synthesized by the engine only:
/// the first when a hook returns an error or panics, the second when the
/// cleanup hook fails. Callers describe their own failures with `Custom`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", content = "code", rename_all = "snake_case")]
pub enum ErrorCause {
    UnknownError,
    WrongStatusError,
    Custom(String),
}

impl ErrorCause {
    pub fn custom(code: impl Into<String>) -> Self {
        Self::Custom(code.into())
    }

    pub fn code(&self) -> &str {
        match self {
            Self::UnknownError => "unknown_error",
            Self::WrongStatusError => "wrong_status_error",
            Self::Custom(code) => code,
        }
    }
}

impl fmt::Display for ErrorCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "severity", content = "cause", rename_all = "snake_case")]
pub enum ErrorClassification {
    #[default]
    None,
    /// Recoverable: the item moves to the error list and the batch continues.
    ItemError(ErrorCause),
    /// Aborts the current run and is recorded on the engine.
    GlobalError(ErrorCause),
}

impl ErrorClassification {
    pub fn item(code: impl Into<String>) -> Self {
        Self::ItemError(ErrorCause::custom(code))
    }

    pub fn global(code: impl Into<String>) -> Self {
        Self::GlobalError(ErrorCause::custom(code))
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    pub fn is_item(&self) -> bool {
        matches!(self, Self::ItemError(_))
    }

    pub fn is_global(&self) -> bool {
        matches!(self, Self::GlobalError(_))
    }

    pub fn cause(&self) -> Option<&ErrorCause> {
        match self {
            Self::None => None,
            Self::ItemError(cause) | Self::GlobalError(cause) => Some(cause),
        }
    }
}

impl fmt::Display for ErrorClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::ItemError(cause) => write!(f, "item error ({cause})"),
            Self::GlobalError(cause) => write!(f, "global error ({cause})"),
        }
    }
}

/// Source of the sentinel classifications and of the equality the retry scan
/// groups error items by.
pub trait ErrorFactory: Send {
    fn none(&self) -> ErrorClassification {
        ErrorClassification::None
    }

    fn unknown_error(&self) -> ErrorClassification {
        ErrorClassification::GlobalError(ErrorCause::UnknownError)
    }

    fn wrong_status_error(&self) -> ErrorClassification {
        ErrorClassification::GlobalError(ErrorCause::WrongStatusError)
    }

    fn same_kind(&self, left: &ErrorClassification, right: &ErrorClassification) -> bool {
        left == right
    }
}

/// Severity plus cause code equality.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardErrors;

impl ErrorFactory for StandardErrors {}

#[cfg(test)]
mod tests {
    use super::{ErrorCause, ErrorClassification, ErrorFactory, StandardErrors};

    #[test]
    fn equality_covers_severity_and_cause() {
        assert_eq!(
            ErrorClassification::item("permission"),
            ErrorClassification::item("permission")
        );
        assert_ne!(
            ErrorClassification::item("permission"),
            ErrorClassification::global("permission")
        );
        assert_ne!(
            ErrorClassification::item("permission"),
            ErrorClassification::item("not-found")
        );
        assert!(!StandardErrors.same_kind(
            &ErrorClassification::item("io"),
            &ErrorClassification::None
        ));
    }

    #[test]
    fn sentinels_are_global_internal_causes() {
        let factory = StandardErrors;
        assert!(factory.none().is_none());
        assert_eq!(
            factory.unknown_error().cause(),
            Some(&ErrorCause::UnknownError)
        );
        assert!(factory.wrong_status_error().is_global());
        assert_eq!(
            factory.wrong_status_error().to_string(),
            "global error (wrong_status_error)"
        );
    }

    #[test]
    fn classification_serializes_with_tagged_layout() {
        let payload = serde_json::to_value(ErrorClassification::item("permission"))
            .expect("classification serializes");
        assert_eq!(payload["severity"], "item_error");
        assert_eq!(payload["cause"]["kind"], "custom");
        assert_eq!(payload["cause"]["code"], "permission");

        let none = serde_json::to_value(ErrorClassification::None).expect("none serializes");
        assert_eq!(none["severity"], "none");
    }
}
