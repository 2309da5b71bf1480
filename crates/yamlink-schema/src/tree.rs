use yamlink_codec::AttrType;

use crate::error::{Result, SchemaError};
use crate::key::KeyDescriptor;

/// Index of a node within its [`SchemaTree`] arena.
///
/// Ids are only meaningful for the tree that produced them and are
/// invalidated by [`SchemaTree::clear`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeId(usize);

/// One level of the key tree.
#[derive(Debug)]
pub struct SchemaNode {
    max_index: u16,
    keys: Vec<Option<KeyDescriptor>>,
    children: Vec<NodeId>,
}

impl SchemaNode {
    fn new(max_index: u16) -> Self {
        Self {
            max_index,
            keys: (0..max_index).map(|_| None).collect(),
            children: Vec::new(),
        }
    }

    /// Declared slot count, inclusive of the reserved slot 0.
    pub fn max_index(&self) -> u16 {
        self.max_index
    }

    /// The descriptor at `index`, if that slot was populated.
    pub fn key(&self, index: u16) -> Option<&KeyDescriptor> {
        self.keys.get(index as usize).and_then(Option::as_ref)
    }

    /// Number of nested levels hanging off this one.
    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Parse policy for a value batch at this level: slot index → declared
    /// primitive type.
    pub fn value_policy(&self) -> Vec<Option<AttrType>> {
        self.keys
            .iter()
            .map(|slot| slot.as_ref().and_then(|key| key.data_type))
            .collect()
    }
}

/// Arena of schema levels, cached from schema messages and read-only during
/// the value phase.
///
/// Nodes are never removed individually; the whole arena is dropped when the
/// session tears down, so no per-node free logic exists.
#[derive(Debug, Default)]
pub struct SchemaTree {
    nodes: Vec<SchemaNode>,
    root: Option<NodeId>,
    sealed: bool,
}

impl SchemaTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether value batches have started arriving.
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Forbid further schema growth. Called on the first value batch.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    /// Allocate a level with `max_index` slots and link it as the last child
    /// of `parent`. The first node inserted becomes the root.
    pub fn insert_node(&mut self, parent: Option<NodeId>, max_index: u16) -> Result<NodeId> {
        if self.sealed {
            return Err(SchemaError::Sealed);
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(SchemaNode::new(max_index));
        match parent {
            Some(parent) => self.nodes[parent.0].children.push(id),
            None => {
                if self.root.is_none() {
                    self.root = Some(id);
                }
            }
        }
        Ok(id)
    }

    /// Populate one key slot. Addressing slot 0, a slot past the declared
    /// size, or an already-populated slot is an error.
    pub fn set_key(&mut self, node: NodeId, desc: KeyDescriptor) -> Result<()> {
        let level = &mut self.nodes[node.0];
        let index = desc.index;
        if index == 0 {
            return Err(SchemaError::ReservedIndex);
        }
        if index >= level.max_index {
            return Err(SchemaError::IndexOutOfRange {
                index,
                max: level.max_index,
            });
        }
        let slot = &mut level.keys[index as usize];
        if slot.is_some() {
            return Err(SchemaError::DuplicateKey { index });
        }
        *slot = Some(desc);
        Ok(())
    }

    /// Replace the stored string of a populated slot. Labels carried in a
    /// value batch overwrite the cached name; allowed after sealing.
    pub fn replace_value(&mut self, node: NodeId, index: u16, value: String) {
        if let Some(Some(key)) = self.nodes[node.0].keys.get_mut(index as usize) {
            key.value = Some(value);
        }
    }

    pub fn node(&self, id: NodeId) -> &SchemaNode {
        &self.nodes[id.0]
    }

    /// The `ordinal`-th nested child of `node`, in declaration order.
    pub fn child_of(&self, node: NodeId, ordinal: usize) -> Option<NodeId> {
        self.nodes[node.0].children.get(ordinal).copied()
    }

    /// Tear down the whole tree; ids handed out so far become invalid.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.root = None;
        self.sealed = false;
    }
}
