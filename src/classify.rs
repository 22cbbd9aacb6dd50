//! Failure classification.
//!
//! Turns raw failure output into the list of files and errors the oracle
//! says are involved. The classifier never fails: an unreachable oracle or
//! an unusable response degrades to an empty list, which simply means no
//! extra context is gathered for this iteration.

use crate::oracle::{decode_value, object_from_value, Oracle, OracleRequest};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Wire tag for file elements. Matched exactly.
pub const FILE_TAG: &str = "file";

/// What an implicated element refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ElementKind {
    /// A source file, identified by path.
    File,
    /// An error, carrying the label the oracle used (e.g. `NameError`).
    Error(String),
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File => f.write_str(FILE_TAG),
            Self::Error(label) => f.write_str(label),
        }
    }
}

/// A file or error implicated by a failure.
///
/// Serialized as `{"element": <kind>, "content": <identifier>}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "RawElement", into = "RawElement")]
pub struct ImplicatedElement {
    pub kind: ElementKind,
    pub identifier: String,
}

impl ImplicatedElement {
    /// A file element.
    pub fn file(identifier: impl Into<String>) -> Self {
        Self {
            kind: ElementKind::File,
            identifier: identifier.into(),
        }
    }

    /// An error element.
    pub fn error(label: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            kind: ElementKind::Error(label.into()),
            identifier: identifier.into(),
        }
    }

    /// Whether this element names a file.
    #[must_use]
    pub fn is_file(&self) -> bool {
        self.kind == ElementKind::File
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawElement {
    element: String,
    content: String,
}

impl From<RawElement> for ImplicatedElement {
    fn from(raw: RawElement) -> Self {
        let kind = if raw.element == FILE_TAG {
            ElementKind::File
        } else {
            ElementKind::Error(raw.element)
        };
        Self {
            kind,
            identifier: raw.content,
        }
    }
}

impl From<ImplicatedElement> for RawElement {
    fn from(element: ImplicatedElement) -> Self {
        Self {
            element: element.kind.to_string(),
            content: element.identifier,
        }
    }
}

/// Deduplicated, ordered identifiers of every file element.
#[must_use]
pub fn file_ids(elements: &[ImplicatedElement]) -> BTreeSet<String> {
    elements
        .iter()
        .filter(|e| e.is_file())
        .map(|e| e.identifier.clone())
        .collect()
}

/// Response schema for classification.
fn classify_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "ARRAY",
        "items": {
            "type": "OBJECT",
            "properties": {
                "element": {
                    "type": "STRING",
                    "description": "file or error"
                },
                "content": {
                    "type": "STRING"
                }
            }
        }
    })
}

/// Prompt asking for every file and error in `failure_text`.
#[must_use]
pub fn build_classify_prompt(failure_text: &str) -> String {
    format!(
        "Given this error output, output a list of all files and errors involved in it.\n\
         Use \"{FILE_TAG}\" as the element for source files and the error type as the element for errors.\n\
         Error Output:\n{failure_text}\n"
    )
}

/// Localizes failures via the oracle.
#[derive(Clone)]
pub struct FailureClassifier {
    oracle: Arc<dyn Oracle>,
}

impl FailureClassifier {
    /// Create a classifier backed by `oracle`.
    pub fn new(oracle: Arc<dyn Oracle>) -> Self {
        Self { oracle }
    }

    /// Ask the oracle which files and errors `failure_text` implicates.
    ///
    /// Entries that are not `{element: string, content: string}` objects
    /// are skipped. Returns an empty list if the oracle fails or the
    /// response is not a JSON array.
    pub async fn classify(&self, failure_text: &str) -> Vec<ImplicatedElement> {
        let request = OracleRequest::new(
            "classify",
            build_classify_prompt(failure_text),
            classify_schema(),
        );

        let raw = match self.oracle.generate(&request).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Failure classification unavailable: {}", e);
                return Vec::new();
            }
        };

        let elements = parse_elements(&raw);
        debug!("Classifier implicated {} element(s)", elements.len());
        elements
    }
}

/// Decode a classifier response, dropping malformed entries.
fn parse_elements(raw: &str) -> Vec<ImplicatedElement> {
    let value = match decode_value(raw) {
        Ok(value) => value,
        Err(e) => {
            warn!("Discarding classifier response: {}", e);
            return Vec::new();
        }
    };

    let serde_json::Value::Array(items) = value else {
        warn!("Discarding classifier response: expected a JSON array");
        return Vec::new();
    };

    items
        .into_iter()
        .filter_map(|item| object_from_value::<ImplicatedElement>(item).ok())
        .collect()
}
