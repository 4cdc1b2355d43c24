use super::NodeKey;

/// A single observed change to a live [`Document`](super::Document).
///
/// Mirrors the three notification classes a mutation observer delivers:
/// attribute writes, character-data writes and child-list changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Attribute {
        target: NodeKey,
        name: String,
    },
    CharacterData {
        target: NodeKey,
    },
    ChildList {
        target: NodeKey,
        added: Vec<NodeKey>,
        removed: Vec<NodeKey>,
    },
}

impl Mutation {
    pub fn target(&self) -> NodeKey {
        match self {
            Mutation::Attribute { target, .. }
            | Mutation::CharacterData { target }
            | Mutation::ChildList { target, .. } => *target,
        }
    }
}

/// Ordered group of mutations delivered together at one checkpoint.
pub type MutationBatch = Vec<Mutation>;
