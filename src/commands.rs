//! Capability traits over the host's flat command registry.
//!
//! A runtime registers each command under its plain name and usually also
//! under a namespaced key (`plugin:name`). Both completion and introspection
//! read the registry through [`CommandMap`] so they never depend on a
//! concrete runtime.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::Result;
use crate::protocol::payloads::Suggestion;

/// Namespace whose entries are hidden from completion and export.
pub const RESERVED_NAMESPACE: &str = "minecraft";

/// Static metadata of a registered command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandDescriptor {
    pub name: String,
    pub description: Option<String>,
    pub aliases: Vec<String>,
    pub permission: Option<String>,
    pub usage: Option<String>,
}

impl CommandDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn permission(mut self, permission: impl Into<String>) -> Self {
        self.permission = Some(permission.into());
        self
    }

    pub fn usage(mut self, usage: impl Into<String>) -> Self {
        self.usage = Some(usage.into());
        self
    }
}

/// A command as seen through the registry.
pub trait RegisteredCommand: Send + Sync {
    fn descriptor(&self) -> CommandDescriptor;

    /// Suggestions for the argument being typed.
    ///
    /// `args` holds every token after the label; the last one is the partial
    /// token (empty when the buffer ends with a space).
    fn complete(&self, label: &str, args: &[String]) -> Result<Vec<Suggestion>>;
}

/// Read access to the registry.
pub trait CommandMap: Send + Sync {
    /// Every registered key, namespaced keys included.
    fn keys(&self) -> Vec<String>;

    /// Exact lookup by key.
    fn lookup(&self, key: &str) -> Option<Arc<dyn RegisteredCommand>>;
}

/// Strip a namespace qualifier from a registry key.
///
/// Returns `None` for keys in a reserved namespace and for keys that are
/// empty or still qualified after stripping.
pub fn normalize_name(raw: &str, reserved: &[String]) -> Option<String> {
    let name = match raw.split_once(':') {
        Some((namespace, rest)) => {
            if reserved.iter().any(|r| r.eq_ignore_ascii_case(namespace)) {
                return None;
            }
            rest
        }
        None => raw,
    };
    if name.is_empty() || name.contains(':') {
        return None;
    }
    Some(name.to_string())
}

/// Resolve a typed label to a registered command.
///
/// Tries an exact lookup first, then scans keys in sorted order for a
/// case-insensitive match or a `namespace:label` entry.
pub fn resolve(commands: &dyn CommandMap, label: &str) -> Option<Arc<dyn RegisteredCommand>> {
    let label = label.to_lowercase();
    if let Some(command) = commands.lookup(&label) {
        return Some(command);
    }

    let suffix = format!(":{label}");
    let mut keys = commands.keys();
    keys.sort();
    keys.iter()
        .find(|key| key.eq_ignore_ascii_case(&label) || key.to_lowercase().ends_with(&suffix))
        .and_then(|key| commands.lookup(key))
}

type CompleteFn = dyn Fn(&str, &[String]) -> Vec<Suggestion> + Send + Sync;

/// A command backed by a descriptor and a completion closure.
pub struct SimpleCommand {
    descriptor: CommandDescriptor,
    completer: Box<CompleteFn>,
}

impl SimpleCommand {
    pub fn new(descriptor: CommandDescriptor) -> Self {
        Self {
            descriptor,
            completer: Box::new(|_, _| Vec::new()),
        }
    }

    pub fn with_completer<F>(mut self, completer: F) -> Self
    where
        F: Fn(&str, &[String]) -> Vec<Suggestion> + Send + Sync + 'static,
    {
        self.completer = Box::new(completer);
        self
    }

    /// Complete the last argument from a fixed word list.
    pub fn with_words(self, words: &[&str]) -> Self {
        let words: Vec<String> = words.iter().map(|w| w.to_string()).collect();
        self.with_completer(move |_, args| {
            let partial = args.last().map(|a| a.to_lowercase()).unwrap_or_default();
            words
                .iter()
                .filter(|w| w.to_lowercase().starts_with(&partial))
                .map(Suggestion::new)
                .collect()
        })
    }
}

impl RegisteredCommand for SimpleCommand {
    fn descriptor(&self) -> CommandDescriptor {
        self.descriptor.clone()
    }

    fn complete(&self, label: &str, args: &[String]) -> Result<Vec<Suggestion>> {
        Ok((self.completer)(label, args))
    }
}

/// In-memory [`CommandMap`].
///
/// Registering a command stores it under `namespace:name`, under its plain
/// name (first registration wins), and under each alias.
#[derive(Default, Clone)]
pub struct StaticCommandMap {
    entries: BTreeMap<String, Arc<dyn RegisteredCommand>>,
}

impl StaticCommandMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, namespace: &str, command: impl RegisteredCommand + 'static) -> &mut Self {
        let command: Arc<dyn RegisteredCommand> = Arc::new(command);
        let descriptor = command.descriptor();
        let name = descriptor.name.to_lowercase();

        self.entries
            .insert(format!("{namespace}:{name}"), command.clone());
        self.entries.entry(name).or_insert_with(|| command.clone());
        for alias in descriptor.aliases {
            self.entries
                .entry(alias.to_lowercase())
                .or_insert_with(|| command.clone());
        }
        self
    }

    /// Register under a raw key only, with no plain-name entry.
    pub fn register_key(&mut self, key: &str, command: impl RegisteredCommand + 'static) -> &mut Self {
        self.entries.insert(key.to_string(), Arc::new(command));
        self
    }
}

impl CommandMap for StaticCommandMap {
    fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    fn lookup(&self, key: &str) -> Option<Arc<dyn RegisteredCommand>> {
        self.entries.get(key).cloned()
    }
}
