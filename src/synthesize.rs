//! Fix synthesis.
//!
//! Asks the oracle for a complete replacement of the target, given its
//! current contents, the failure output, and the gathered context.

use crate::context::FileSnapshot;
use crate::oracle::{decode_object, Oracle, OracleRequest};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Placeholder used when the target is missing from the snapshot.
pub const CONTENT_NOT_FOUND: &str = "File content not found.";

/// A proposed fix for the target.
///
/// Only a non-blank `full_corrected_script` is ever written; proposals
/// without one are still kept in the execution log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixProposal {
    /// Step-by-step analysis of the failure.
    #[serde(default)]
    pub reasoning: String,

    /// Short description of the change.
    #[serde(rename = "suggested_fix", default)]
    pub suggested_fix_summary: String,

    /// Complete replacement for the target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_corrected_script: Option<String>,
}

impl FixProposal {
    /// The replacement script, if it is usable.
    #[must_use]
    pub fn corrected_script(&self) -> Option<&str> {
        self.full_corrected_script
            .as_deref()
            .filter(|script| !script.trim().is_empty())
    }

    /// Whether this proposal can be written to the target.
    #[must_use]
    pub fn is_applicable(&self) -> bool {
        self.corrected_script().is_some()
    }
}

fn proposal_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "OBJECT",
        "properties": {
            "reasoning": { "type": "STRING" },
            "suggested_fix": { "type": "STRING" },
            "full_corrected_script": { "type": "STRING" }
        },
        "required": ["reasoning", "suggested_fix", "full_corrected_script"]
    })
}

/// Build the synthesis prompt.
///
/// `related` holds the gathered files other than the target.
#[must_use]
pub fn build_fix_prompt(
    target: &Path,
    target_contents: &str,
    failure_text: &str,
    related: &FileSnapshot,
) -> String {
    let mut prompt = format!(
        "You are a coding assistant tasked with fixing errors in scripts.\n\n\
         Original Script ({}):\n```\n{}\n```\n\n\
         Error Output:\n```\n{}\n```\n\n\
         Relevant File Contents:\n",
        target.display(),
        target_contents,
        failure_text
    );

    for (identifier, contents) in related.iter() {
        prompt.push_str(&format!("```\n# {identifier}\n{contents}\n```\n\n"));
    }

    prompt.push_str(
        "\nAnalyze the error and provide a solution. Respond with a JSON object:\n\
         {\n\
         \x20 \"reasoning\": \"Step-by-step reasoning of the error and the proposed fix.\",\n\
         \x20 \"suggested_fix\": \"A brief description of the changes needed.\",\n\
         \x20 \"full_corrected_script\": \"The complete corrected script. Keep the logic and structure of the original script.\"\n\
         }\n",
    );
    prompt
}

/// Produces fix proposals via the oracle.
#[derive(Clone)]
pub struct FixSynthesizer {
    oracle: Arc<dyn Oracle>,
}

impl FixSynthesizer {
    pub fn new(oracle: Arc<dyn Oracle>) -> Self {
        Self { oracle }
    }

    /// Ask for a corrected version of `target`.
    ///
    /// Returns `None` if the oracle fails or the response is not a JSON
    /// object with string fields. Missing fields are tolerated.
    pub async fn synthesize(
        &self,
        target: &Path,
        target_contents: &str,
        failure_text: &str,
        related: &FileSnapshot,
    ) -> Option<FixProposal> {
        let prompt = build_fix_prompt(target, target_contents, failure_text, related);
        debug!(
            "Synthesis prompt: {} chars, {} related file(s)",
            prompt.len(),
            related.len()
        );
        let request = OracleRequest::new("synthesize", prompt, proposal_schema());

        let raw = match self.oracle.generate(&request).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Fix synthesis unavailable: {}", e);
                return None;
            }
        };

        match decode_object::<FixProposal>(&raw) {
            Ok(proposal) => Some(proposal),
            Err(e) => {
                warn!("Discarding fix proposal: {}", e);
                None
            }
        }
    }
}
