use ms_core::agent::{CorrectionAgent, ListCorrectionsRequest};
use ms_core::backend::TranscribeRequest;
use std::collections::HashSet;

const MAX_CORRECTIONS: u32 = 200;

/// Build the initial prompt that biases decoding toward known terms.
///
/// Fetches all corrections stored for the client, plus project-scoped ones
/// when the request carries a project, merges the original/corrected terms,
/// deduplicates, and joins with ", ". A fetch failure never fails the
/// transcription; it only costs the prompt.
pub async fn build_initial_prompt(
    agent: &dyn CorrectionAgent,
    req: &TranscribeRequest,
) -> Option<String> {
    let client_id = req.client_id.as_deref()?;

    let mut rules = Vec::new();

    let client_scoped = ListCorrectionsRequest {
        client_id: client_id.to_string(),
        project_id: None,
        max_results: MAX_CORRECTIONS,
    };
    match agent.list_corrections(&client_scoped).await {
        Ok(found) => rules.extend(found),
        Err(e) => {
            tracing::warn!("Failed to fetch corrections for initial prompt: {}", e);
            return None;
        }
    }

    if let Some(project_id) = req.project_id.as_deref() {
        let project_scoped = ListCorrectionsRequest {
            client_id: client_id.to_string(),
            project_id: Some(project_id.to_string()),
            max_results: MAX_CORRECTIONS,
        };
        match agent.list_corrections(&project_scoped).await {
            Ok(found) => rules.extend(found),
            Err(e) => {
                // Client-scoped terms are still usable on their own
                tracing::warn!("Failed to fetch project corrections for initial prompt: {}", e);
            }
        }
    }

    let mut seen = HashSet::new();
    let mut terms = Vec::new();
    for rule in &rules {
        for term in [rule.original.trim(), rule.corrected.trim()] {
            if !term.is_empty() && seen.insert(term.to_string()) {
                terms.push(term.to_string());
            }
        }
    }

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(", "))
    }
}
