//! Completion service seam.
//!
//! The pipeline only needs a blocking `complete(prompt) -> text`. Replies carry no
//! structural guarantee; all parsing robustness lives in [`crate::grammar`].

use tracing::{debug, warn};

use crate::prompts::Stage;

/// Marker the completion client returns in place of a reply when a call fails.
pub const CLIENT_ERROR_MARKER: &str = "Error in chat";

/// A text-completion service.
pub trait CompletionService {
    /// Complete a prompt. May return an empty string on failure.
    fn complete(&self, prompt: &str) -> String;
}

impl<F> CompletionService for F
where
    F: Fn(&str) -> String,
{
    fn complete(&self, prompt: &str) -> String {
        self(prompt)
    }
}

/// Whether a reply carries any content at all.
pub fn is_usable_reply(reply: &str) -> bool {
    let trimmed = reply.trim();
    !trimmed.is_empty() && !trimmed.starts_with(CLIENT_ERROR_MARKER)
}

/// Sequential access to the completion service for one pipeline run.
///
/// Every prompt is prefixed with its stage header. Empty or error replies are
/// retried a bounded number of times, one call at a time.
pub struct ModelChannel<'a> {
    service: &'a dyn CompletionService,
    empty_reply_retries: u32,
}

impl<'a> ModelChannel<'a> {
    pub fn new(service: &'a dyn CompletionService, empty_reply_retries: u32) -> Self {
        Self {
            service,
            empty_reply_retries,
        }
    }

    /// Ask the model for one stage. Returns an empty string if every attempt failed.
    pub fn ask(&self, stage: Stage, body: &str) -> String {
        let prompt = format!("{}\n{}", stage.header(), body);

        for attempt in 0..=self.empty_reply_retries {
            let reply = self.service.complete(&prompt);
            debug!(
                stage = stage.label(),
                attempt,
                prompt_len = prompt.len(),
                reply_len = reply.len(),
                "Completion returned"
            );
            if is_usable_reply(&reply) {
                return reply;
            }
        }

        warn!(stage = stage.label(), "Completion produced no usable reply");
        String::new()
    }
}
