//! Scripted completion service for tests and offline runs.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use crate::completion::CompletionService;
use crate::prompts::Stage;

/// A completion service that answers from per-stage scripts.
///
/// Replies for a stage are consumed in order; the last one is repeated once the
/// script runs out. A stage with no script gets an empty reply. Every prompt is
/// recorded.
#[derive(Debug, Default)]
pub struct ScriptedCompletion {
    scripts: Mutex<HashMap<Stage, VecDeque<String>>>,
    calls: Mutex<Vec<(Option<Stage>, String)>>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScriptedCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for `stage`.
    pub fn reply(self, stage: Stage, text: &str) -> Self {
        locked(&self.scripts)
            .entry(stage)
            .or_default()
            .push_back(text.to_string());
        self
    }

    /// Every prompt sent for `stage`, in order.
    pub fn calls_for(&self, stage: Stage) -> Vec<String> {
        locked(&self.calls)
            .iter()
            .filter(|(s, _)| *s == Some(stage))
            .map(|(_, prompt)| prompt.clone())
            .collect()
    }

    pub fn call_count(&self, stage: Stage) -> usize {
        locked(&self.calls)
            .iter()
            .filter(|(s, _)| *s == Some(stage))
            .count()
    }

    pub fn total_calls(&self) -> usize {
        locked(&self.calls).len()
    }
}

impl CompletionService for ScriptedCompletion {
    fn complete(&self, prompt: &str) -> String {
        let stage = Stage::of_prompt(prompt);
        locked(&self.calls).push((stage, prompt.to_string()));

        let Some(stage) = stage else {
            return String::new();
        };
        let mut scripts = locked(&self.scripts);
        match scripts.get_mut(&stage) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_default(),
            Some(queue) => queue.front().cloned().unwrap_or_default(),
            None => String::new(),
        }
    }
}
