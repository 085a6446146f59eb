use std::collections::BTreeSet;
use std::sync::Arc;

use super::{tokenize, CompletionProvider, DEFAULT_MAX_COMPLETIONS};
use crate::commands::{normalize_name, resolve, CommandMap, RESERVED_NAMESPACE};
use crate::dispatcher::blocking;
use crate::error::Result;
use crate::handler::BoxFuture;
use crate::protocol::payloads::{Completions, Suggestion};

/// Completes directly against the command registry.
///
/// A single token completes a command name; anything longer is delegated to
/// the resolved command's own completion. Results are deterministic for a
/// given registry. Through [`CompletionProvider`] the host's completers run on
/// the blocking pool, like every other host call.
#[derive(Clone)]
pub struct SyncCompletionProvider {
    commands: Arc<dyn CommandMap>,
    max_completions: usize,
    reserved: Vec<String>,
}

impl SyncCompletionProvider {
    pub fn new(commands: Arc<dyn CommandMap>) -> Self {
        Self {
            commands,
            max_completions: DEFAULT_MAX_COMPLETIONS,
            reserved: vec![RESERVED_NAMESPACE.to_string()],
        }
    }

    pub fn max_completions(mut self, max: usize) -> Self {
        self.max_completions = max;
        self
    }

    pub fn reserved_namespaces(mut self, namespaces: Vec<String>) -> Self {
        self.reserved = namespaces;
        self
    }

    /// Compute completions without going through the async trait.
    pub fn complete_now(&self, buffer: &str) -> Completions {
        let tokens = tokenize(buffer);
        let suggestions = match tokens.as_slice() {
            [] => Vec::new(),
            [label] => self.complete_label(label),
            [label, args @ ..] => self.complete_args(label, args),
        };
        Completions::sync(suggestions)
    }

    fn complete_label(&self, partial: &str) -> Vec<Suggestion> {
        let partial = partial.to_lowercase();
        let names: BTreeSet<String> = self
            .commands
            .keys()
            .iter()
            .filter_map(|key| normalize_name(key, &self.reserved))
            .filter(|name| name.to_lowercase().starts_with(&partial))
            .collect();

        names
            .into_iter()
            .take(self.max_completions)
            .map(Suggestion::new)
            .collect()
    }

    fn complete_args(&self, label: &str, args: &[&str]) -> Vec<Suggestion> {
        let Some(command) = resolve(self.commands.as_ref(), label) else {
            tracing::debug!(label, "completion for unknown command");
            return Vec::new();
        };

        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        match command.complete(&label.to_lowercase(), &args) {
            Ok(suggestions) => suggestions,
            Err(e) => {
                tracing::warn!(label, error = %e, "command completion failed");
                Vec::new()
            }
        }
    }
}

impl CompletionProvider for SyncCompletionProvider {
    fn complete<'a>(&'a self, buffer: &'a str) -> BoxFuture<'a, Result<Completions>> {
        let provider = self.clone();
        let buffer = buffer.to_string();
        Box::pin(blocking(move || Ok(provider.complete_now(&buffer))))
    }

    fn is_async(&self) -> bool {
        false
    }
}
