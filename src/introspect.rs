//! Command tree export.
//!
//! [`CommandIntrospector`] is the capability the dispatcher depends on; each
//! runtime variant plugs in an implementation:
//!
//! - [`GraphIntrospector`] walks a typed command graph (literal and argument
//!   nodes, possibly cyclic) and supplements it with flat registry entries.
//! - [`FlatIntrospector`] exports descriptor-only nodes from the registry for
//!   runtimes without graph access.
//!
//! Both normalize root names (namespace stripped, reserved namespaces
//! skipped) and de-duplicate them case-insensitively, first seen wins.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::commands::{normalize_name, CommandDescriptor, CommandMap, RESERVED_NAMESPACE};
use crate::error::Result;
use crate::protocol::payloads::{CommandNode, CommandTree};

/// Levels of children exported below a root command.
pub const MAX_DEPTH: usize = 6;

/// Cap on examples attached to one argument node.
pub const MAX_EXAMPLES: usize = 100;

/// Exports the runtime's command tree.
pub trait CommandIntrospector: Send + Sync {
    fn export(&self) -> Result<CommandTree>;
}

/// Parser type of an argument node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgumentType {
    Integer,
    Long,
    Float,
    Double,
    Boolean,
    Word,
    QuotablePhrase,
    GreedyPhrase,
    /// A runtime-specific parser, identified by its type name
    /// (e.g. `EntityArgument`).
    Native(String),
}

impl ArgumentType {
    /// Tag written into the exported node's `type` field.
    pub fn tag(&self) -> String {
        let tag = match self {
            ArgumentType::Integer => "integer",
            ArgumentType::Long => "long",
            ArgumentType::Float => "float",
            ArgumentType::Double => "double",
            ArgumentType::Boolean => "boolean",
            ArgumentType::Word => "word",
            ArgumentType::QuotablePhrase => "string",
            ArgumentType::GreedyPhrase => "greedy_string",
            ArgumentType::Native(name) => return native_tag(name),
        };
        tag.to_string()
    }

    /// Examples used when the parser supplies none.
    pub fn fallback_examples(&self) -> &'static [&'static str] {
        match self {
            ArgumentType::Integer => &["0", "1", "10", "64"],
            ArgumentType::Float | ArgumentType::Double => &["0.0", "1.0", "0.5"],
            ArgumentType::Boolean => &["true", "false"],
            ArgumentType::Native(name) => match name.as_str() {
                "EntityArgument" | "GameProfileArgument" => &["@p", "@a", "@e", "@s", "PlayerName"],
                "BlockPosArgument" => &["~ ~ ~", "0 64 0", "~1 ~-1 ~1"],
                "Vec3Argument" => &["~ ~ ~", "0.0 64.0 0.0"],
                "BlockStateArgument" => &["stone", "minecraft:dirt", "oak_log[axis=y]"],
                "ItemArgument" => &["diamond", "minecraft:stick", "iron_sword{Damage:0}"],
                "ColorArgument" => &["red", "blue", "green", "white"],
                "GameModeArgument" => &["survival", "creative", "adventure", "spectator"],
                "DimensionArgument" => &["overworld", "the_nether", "the_end"],
                "TimeArgument" => &["1d", "1s", "1t", "100"],
                _ => &[],
            },
            _ => &[],
        }
    }
}

fn native_tag(name: &str) -> String {
    let known = match name {
        "EntityArgument" => "entity",
        "GameProfileArgument" => "player",
        "BlockPosArgument" => "block_pos",
        "Vec3Argument" => "position",
        "Vec2Argument" => "position_2d",
        "BlockStateArgument" => "block",
        "ItemArgument" => "item",
        "ColorArgument" => "color",
        "ComponentArgument" => "component",
        "MessageArgument" => "message",
        "NbtCompoundTagArgument" => "nbt",
        "NbtPathArgument" => "nbt_path",
        "ObjectiveArgument" => "objective",
        "ObjectiveCriteriaArgument" => "criteria",
        "OperationArgument" => "operation",
        "ParticleArgument" => "particle",
        "AngleArgument" => "angle",
        "RotationArgument" => "rotation",
        "ScoreboardSlotArgument" => "scoreboard_slot",
        "ScoreHolderArgument" => "score_holder",
        "SwizzleArgument" => "swizzle",
        "TeamArgument" => "team",
        "TimeArgument" => "time",
        "UuidArgument" => "uuid",
        "ResourceLocationArgument" => "resource_location",
        "ResourceKeyArgument" => "resource_key",
        "DimensionArgument" => "dimension",
        "GameModeArgument" => "gamemode",
        "HeightmapTypeArgument" => "heightmap",
        "TemplateRotationArgument" => "template_rotation",
        "TemplateMirrorArgument" => "template_mirror",
        other => return other.replace("Argument", "").to_lowercase(),
    };
    known.to_string()
}

/// Kind of a node in the runtime's command graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphNodeKind {
    Literal,
    Argument(ArgumentType),
}

/// A node of the runtime's command graph.
pub trait GraphNode: Send + Sync {
    fn name(&self) -> String;

    fn kind(&self) -> GraphNodeKind;

    /// Examples the parser supplies itself.
    fn examples(&self) -> Vec<String> {
        Vec::new()
    }

    /// Children of this node. The graph may contain cycles.
    fn children(&self) -> Result<Vec<Arc<dyn GraphNode>>>;
}

/// Entry point into a runtime's command graph.
pub trait CommandGraph: Send + Sync {
    fn roots(&self) -> Result<Vec<Arc<dyn GraphNode>>>;
}

/// Root set under construction with case-insensitive de-duplication.
#[derive(Default)]
struct RootSet {
    seen: HashSet<String>,
    tree: CommandTree,
}

impl RootSet {
    /// Insert unless a name equal ignoring case is already present.
    fn insert_with(&mut self, name: String, node: impl FnOnce() -> CommandNode) -> bool {
        if !self.seen.insert(name.to_lowercase()) {
            return false;
        }
        self.tree.commands.insert(name, node());
        true
    }

    fn contains(&self, name: &str) -> bool {
        self.seen.contains(&name.to_lowercase())
    }
}

fn descriptor_node(descriptor: &CommandDescriptor, with_permission: bool) -> CommandNode {
    CommandNode {
        aliases: (!descriptor.aliases.is_empty()).then(|| descriptor.aliases.clone()),
        permission: if with_permission {
            descriptor.permission.clone()
        } else {
            None
        },
        usage: descriptor.usage.clone(),
        ..CommandNode::literal(descriptor.description.clone())
    }
}

/// Add every flat registry entry not already present.
fn export_flat(commands: &dyn CommandMap, reserved: &[String], roots: &mut RootSet) {
    let mut keys = commands.keys();
    keys.sort();
    for key in keys {
        let Some(command) = commands.lookup(&key) else {
            continue;
        };
        let descriptor = command.descriptor();
        let Some(name) = normalize_name(&descriptor.name, reserved)
            .or_else(|| normalize_name(&key, reserved))
        else {
            continue;
        };
        if key
            .split_once(':')
            .is_some_and(|(ns, _)| reserved.iter().any(|r| r.eq_ignore_ascii_case(ns)))
        {
            continue;
        }
        roots.insert_with(name, || descriptor_node(&descriptor, true));
    }
}

/// Exports a command graph, bounded by [`MAX_DEPTH`].
pub struct GraphIntrospector {
    graph: Arc<dyn CommandGraph>,
    commands: Arc<dyn CommandMap>,
    reserved: Vec<String>,
    max_depth: usize,
}

impl GraphIntrospector {
    pub fn new(graph: Arc<dyn CommandGraph>, commands: Arc<dyn CommandMap>) -> Self {
        Self {
            graph,
            commands,
            reserved: vec![RESERVED_NAMESPACE.to_string()],
            max_depth: MAX_DEPTH,
        }
    }

    pub fn reserved_namespaces(mut self, namespaces: Vec<String>) -> Self {
        self.reserved = namespaces;
        self
    }

    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    fn export_children(&self, node: &dyn GraphNode, level: usize) -> BTreeMap<String, CommandNode> {
        let mut out = BTreeMap::new();
        if level > self.max_depth {
            return out;
        }

        let children = match node.children() {
            Ok(children) => children,
            Err(e) => {
                tracing::debug!(node = %node.name(), error = %e, "skipping broken subtree");
                return out;
            }
        };

        for child in children {
            let grandchildren = self.export_children(child.as_ref(), level + 1);
            let grandchildren = (!grandchildren.is_empty()).then_some(grandchildren);

            match child.kind() {
                GraphNodeKind::Literal => {
                    let mut exported = CommandNode::literal(None);
                    exported.children = grandchildren;
                    out.entry(child.name()).or_insert(exported);
                }
                GraphNodeKind::Argument(ty) => {
                    let mut examples = child.examples();
                    if examples.is_empty() {
                        examples = ty.fallback_examples().iter().map(|s| s.to_string()).collect();
                    }
                    examples.truncate(MAX_EXAMPLES);

                    let mut exported = CommandNode {
                        kind: ty.tag(),
                        examples: (!examples.is_empty()).then_some(examples),
                        ..CommandNode::literal(None)
                    };
                    exported.children = grandchildren;
                    out.entry(format!("<{}>", child.name())).or_insert(exported);
                }
            }
        }
        out
    }
}

impl CommandIntrospector for GraphIntrospector {
    fn export(&self) -> Result<CommandTree> {
        let mut roots = RootSet::default();

        match self.graph.roots() {
            Ok(graph_roots) => {
                for root in graph_roots {
                    if root.kind() != GraphNodeKind::Literal {
                        continue;
                    }
                    let Some(name) = normalize_name(&root.name(), &self.reserved) else {
                        continue;
                    };
                    if roots.contains(&name) {
                        continue;
                    }

                    let descriptor = crate::commands::resolve(self.commands.as_ref(), &name)
                        .map(|c| c.descriptor());
                    let children = self.export_children(root.as_ref(), 1);

                    roots.insert_with(name, || {
                        let mut node = match &descriptor {
                            Some(d) => descriptor_node(d, false),
                            None => CommandNode::literal(None),
                        };
                        node.children = (!children.is_empty()).then_some(children);
                        node
                    });
                }
            }
            Err(e) => tracing::warn!(error = %e, "command graph unavailable, exporting registry only"),
        }

        export_flat(self.commands.as_ref(), &self.reserved, &mut roots);
        tracing::debug!(commands = roots.tree.len(), "command tree exported");
        Ok(roots.tree)
    }
}

/// Exports descriptor-only nodes from the flat registry.
pub struct FlatIntrospector {
    commands: Arc<dyn CommandMap>,
    reserved: Vec<String>,
}

impl FlatIntrospector {
    pub fn new(commands: Arc<dyn CommandMap>) -> Self {
        Self {
            commands,
            reserved: vec![RESERVED_NAMESPACE.to_string()],
        }
    }

    pub fn reserved_namespaces(mut self, namespaces: Vec<String>) -> Self {
        self.reserved = namespaces;
        self
    }
}

impl CommandIntrospector for FlatIntrospector {
    fn export(&self) -> Result<CommandTree> {
        let mut roots = RootSet::default();
        export_flat(self.commands.as_ref(), &self.reserved, &mut roots);
        Ok(roots.tree)
    }
}

/// Top-level commands whose name starts with `prefix`, ignoring case.
pub fn filter_prefix(tree: &CommandTree, prefix: &str) -> CommandTree {
    let prefix = prefix.to_lowercase();
    CommandTree {
        commands: tree
            .commands
            .iter()
            .filter(|(name, _)| name.to_lowercase().starts_with(&prefix))
            .map(|(name, node)| (name.clone(), node.clone()))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{SimpleCommand, StaticCommandMap};
    use crate::error::BridgeError;

    struct Node {
        name: &'static str,
        kind: GraphNodeKind,
        examples: Vec<String>,
        children: Vec<Arc<dyn GraphNode>>,
    }

    impl Node {
        fn literal(name: &'static str, children: Vec<Arc<dyn GraphNode>>) -> Arc<dyn GraphNode> {
            Arc::new(Node {
                name,
                kind: GraphNodeKind::Literal,
                examples: Vec::new(),
                children,
            })
        }

        fn argument(
            name: &'static str,
            ty: ArgumentType,
            children: Vec<Arc<dyn GraphNode>>,
        ) -> Arc<dyn GraphNode> {
            Arc::new(Node {
                name,
                kind: GraphNodeKind::Argument(ty),
                examples: Vec::new(),
                children,
            })
        }
    }

    impl GraphNode for Node {
        fn name(&self) -> String {
            self.name.to_string()
        }
        fn kind(&self) -> GraphNodeKind {
            self.kind.clone()
        }
        fn examples(&self) -> Vec<String> {
            self.examples.clone()
        }
        fn children(&self) -> Result<Vec<Arc<dyn GraphNode>>> {
            Ok(self.children.clone())
        }
    }

    /// A node whose only child is another instance of itself.
    struct Looping;

    impl GraphNode for Looping {
        fn name(&self) -> String {
            "again".into()
        }
        fn kind(&self) -> GraphNodeKind {
            GraphNodeKind::Literal
        }
        fn children(&self) -> Result<Vec<Arc<dyn GraphNode>>> {
            Ok(vec![Arc::new(Looping)])
        }
    }

    struct Broken;

    impl GraphNode for Broken {
        fn name(&self) -> String {
            "broken".into()
        }
        fn kind(&self) -> GraphNodeKind {
            GraphNodeKind::Literal
        }
        fn children(&self) -> Result<Vec<Arc<dyn GraphNode>>> {
            Err(BridgeError::HandlerFailed("permission context missing".into()))
        }
    }

    struct Graph(Vec<Arc<dyn GraphNode>>);

    impl CommandGraph for Graph {
        fn roots(&self) -> Result<Vec<Arc<dyn GraphNode>>> {
            Ok(self.0.clone())
        }
    }

    fn registry() -> Arc<dyn CommandMap> {
        let mut map = StaticCommandMap::new();
        map.register(
            "minecraft",
            SimpleCommand::new(
                CommandDescriptor::new("give")
                    .description("Gives an item to a player")
                    .usage("/give <targets> <item> [<count>]"),
            ),
        );
        map.register(
            "essentials",
            SimpleCommand::new(
                CommandDescriptor::new("heal")
                    .description("Heals a player")
                    .permission("essentials.heal")
                    .alias("eheal"),
            ),
        );
        map.register_key("minecraft:seed", SimpleCommand::new(CommandDescriptor::new("seed")));
        Arc::new(map)
    }

    fn give_graph() -> Arc<dyn GraphNode> {
        Node::literal(
            "give",
            vec![Node::argument(
                "targets",
                ArgumentType::Native("EntityArgument".into()),
                vec![Node::argument(
                    "item",
                    ArgumentType::Native("ItemArgument".into()),
                    vec![Node::argument("count", ArgumentType::Integer, vec![])],
                )],
            )],
        )
    }

    #[test]
    fn test_argument_tags() {
        assert_eq!(ArgumentType::GreedyPhrase.tag(), "greedy_string");
        assert_eq!(ArgumentType::Native("GameProfileArgument".into()).tag(), "player");
        assert_eq!(ArgumentType::Native("FancyWidgetArgument".into()).tag(), "fancywidget");
    }

    #[test]
    fn test_graph_export_shapes_arguments() {
        let graph = Arc::new(Graph(vec![give_graph()]));
        let tree = GraphIntrospector::new(graph, registry()).export().unwrap();

        let give = &tree.commands["give"];
        assert_eq!(give.description.as_deref(), Some("Gives an item to a player"));
        assert!(give.is_literal());

        let targets = &give.children.as_ref().unwrap()["<targets>"];
        assert_eq!(targets.kind, "entity");
        assert_eq!(targets.examples.as_ref().unwrap()[0], "@p");
        assert_eq!(targets.required, None);

        let count = &targets.children.as_ref().unwrap()["<item>"].children.as_ref().unwrap()["<count>"];
        assert_eq!(count.kind, "integer");
        assert_eq!(count.examples.as_deref().unwrap(), ["0", "1", "10", "64"]);
        assert!(count.children.is_none());
    }

    #[test]
    fn test_graph_export_supplements_registry() {
        let graph = Arc::new(Graph(vec![give_graph()]));
        let tree = GraphIntrospector::new(graph, registry()).export().unwrap();

        let heal = &tree.commands["heal"];
        assert_eq!(heal.permission.as_deref(), Some("essentials.heal"));
        assert_eq!(heal.aliases.as_deref().unwrap(), ["eheal"]);
        assert!(!tree.commands.contains_key("seed"));
    }

    #[test]
    fn test_root_names_normalized_and_deduplicated() {
        let graph = Arc::new(Graph(vec![
            Node::literal("minecraft:give", vec![]),
            Node::literal("Test", vec![Node::literal("first", vec![])]),
            Node::literal("plugin:test", vec![Node::literal("second", vec![])]),
            Node::argument("notaroot", ArgumentType::Word, vec![]),
        ]));
        let tree = GraphIntrospector::new(graph, Arc::new(StaticCommandMap::new()))
            .export()
            .unwrap();

        let names: Vec<_> = tree.commands.keys().cloned().collect();
        assert_eq!(names, vec!["Test"]);
        assert!(tree.commands["Test"].children.as_ref().unwrap().contains_key("first"));
    }

    #[test]
    fn test_cyclic_graph_bounded() {
        let graph = Arc::new(Graph(vec![Node::literal("loop", vec![Arc::new(Looping)])]));
        let tree = GraphIntrospector::new(graph, Arc::new(StaticCommandMap::new()))
            .export()
            .unwrap();

        assert_eq!(tree.commands["loop"].depth(), MAX_DEPTH);
    }

    #[test]
    fn test_broken_subtree_exported_childless() {
        let graph = Arc::new(Graph(vec![
            Arc::new(Broken) as Arc<dyn GraphNode>,
            Node::literal("ok", vec![Node::literal("sub", vec![])]),
        ]));
        let tree = GraphIntrospector::new(graph, Arc::new(StaticCommandMap::new()))
            .export()
            .unwrap();

        assert!(tree.commands["broken"].children.is_none());
        assert!(tree.commands["ok"].children.is_some());
    }

    #[test]
    fn test_native_examples_capped() {
        let many: Vec<String> = (0..250).map(|i| format!("custom_{i}")).collect();
        let arg: Arc<dyn GraphNode> = Arc::new(Node {
            name: "thing",
            kind: GraphNodeKind::Argument(ArgumentType::Native("OraxenItemArgument".into())),
            examples: many,
            children: vec![],
        });
        let graph = Arc::new(Graph(vec![Node::literal("ox", vec![arg])]));
        let tree = GraphIntrospector::new(graph, Arc::new(StaticCommandMap::new()))
            .export()
            .unwrap();

        let thing = &tree.commands["ox"].children.as_ref().unwrap()["<thing>"];
        assert_eq!(thing.examples.as_ref().unwrap().len(), MAX_EXAMPLES);
        assert_eq!(thing.kind, "oraxenitem");
    }

    #[test]
    fn test_flat_export() {
        let tree = FlatIntrospector::new(registry()).export().unwrap();
        let names: Vec<_> = tree.commands.keys().cloned().collect();
        assert_eq!(names, vec!["give", "heal"]);
        assert!(tree.commands["give"].children.is_none());
    }

    #[test]
    fn test_filter_prefix() {
        let tree = FlatIntrospector::new(registry()).export().unwrap();
        let filtered = filter_prefix(&tree, "HE");
        assert_eq!(filtered.len(), 1);
        assert!(filtered.commands.contains_key("heal"));
    }
}
