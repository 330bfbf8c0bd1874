use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::ids::MessageId;

/// Payload columns (`content`, `role`, ...) are opaque to the planner.
pub type MessageFields = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRef {
    pub id: MessageId,
}

impl MessageRef {
    pub fn new(id: impl Into<MessageId>) -> Self {
        Self { id: id.into() }
    }
}

/// Parent link a caller may put on a create record: an existing (or
/// same-batch) message by id, or another record created in the same request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CreateInputParent {
    Connect(MessageRef),
    Create(Box<MessageCreateInput>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageCreateInput {
    pub id: MessageId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<CreateInputParent>,
    #[serde(flatten)]
    pub fields: MessageFields,
}

impl MessageCreateInput {
    pub fn new(id: impl Into<MessageId>) -> Self {
        Self {
            id: id.into(),
            parent: None,
            fields: MessageFields::new(),
        }
    }

    pub fn with_content(self, content: impl Into<String>) -> Self {
        self.with_field("content", Value::String(content.into()))
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<MessageId>) -> Self {
        self.parent = Some(CreateInputParent::Connect(MessageRef::new(parent_id)));
        self
    }

    pub fn with_nested_parent(mut self, parent: MessageCreateInput) -> Self {
        self.parent = Some(CreateInputParent::Create(Box::new(parent)));
        self
    }

    /// Id named by `parent.connect`, if the parent is a connect.
    pub fn parent_id(&self) -> Option<&MessageId> {
        match &self.parent {
            Some(CreateInputParent::Connect(target)) => Some(&target.id),
            _ => None,
        }
    }
}

/// Parent of a planned create: either an existing message or the nested
/// creation of its ancestor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CreateParent {
    Connect(MessageRef),
    Create(Box<MessageCreate>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageCreate {
    pub id: MessageId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<CreateParent>,
    #[serde(flatten)]
    pub fields: MessageFields,
}

impl MessageCreate {
    /// Walks from this record up through nested `parent.create` records.
    pub fn lineage(&self) -> impl Iterator<Item = &MessageCreate> {
        std::iter::successors(Some(self), |node| match &node.parent {
            Some(CreateParent::Create(parent)) => Some(parent.as_ref()),
            _ => None,
        })
    }

    /// The existing message the whole chain hangs off, if any.
    pub fn anchor(&self) -> Option<&MessageId> {
        match self.lineage().last().and_then(|root| root.parent.as_ref()) {
            Some(CreateParent::Connect(target)) => Some(&target.id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "UpdateParentRepr", into = "UpdateParentRepr")]
pub enum UpdateParent {
    Connect(MessageId),
    Disconnect,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct UpdateParentRepr {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    connect: Option<MessageRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    disconnect: Option<bool>,
}

impl TryFrom<UpdateParentRepr> for UpdateParent {
    type Error = String;

    fn try_from(repr: UpdateParentRepr) -> Result<Self, Self::Error> {
        match (repr.connect, repr.disconnect) {
            (Some(target), None | Some(false)) => Ok(Self::Connect(target.id)),
            (None, Some(true)) => Ok(Self::Disconnect),
            (Some(_), Some(true)) => {
                Err("parent update cannot both connect and disconnect".to_string())
            }
            (None, None | Some(false)) => {
                Err("parent update needs `connect` or `disconnect: true`".to_string())
            }
        }
    }
}

impl From<UpdateParent> for UpdateParentRepr {
    fn from(parent: UpdateParent) -> Self {
        match parent {
            UpdateParent::Connect(id) => Self {
                connect: Some(MessageRef { id }),
                disconnect: None,
            },
            UpdateParent::Disconnect => Self {
                connect: None,
                disconnect: Some(true),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageUpdate {
    pub id: MessageId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<UpdateParent>,
    #[serde(flatten)]
    pub fields: MessageFields,
}

impl MessageUpdate {
    pub fn new(id: impl Into<MessageId>) -> Self {
        Self {
            id: id.into(),
            parent: None,
            fields: MessageFields::new(),
        }
    }

    pub fn reparent(id: MessageId, parent: UpdateParent) -> Self {
        Self {
            id,
            parent: Some(parent),
            fields: MessageFields::new(),
        }
    }

    pub fn with_content(self, content: impl Into<String>) -> Self {
        self.with_field("content", Value::String(content.into()))
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChatMessageOperations {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub create: Vec<MessageCreateInput>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub update: Vec<MessageUpdate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub delete: Vec<MessageRef>,
}

impl ChatMessageOperations {
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }

    pub fn operation_count(&self) -> usize {
        self.create.len() + self.update.len() + self.delete.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageTreeNode {
    #[serde(default)]
    pub parent_id: Option<MessageId>,
    #[serde(default)]
    pub child_ids: Vec<MessageId>,
}

/// Topology snapshot taken right before planning.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPreBranchInfo {
    #[serde(default)]
    pub last_sequence_id: Option<MessageId>,
    #[serde(default)]
    pub message_tree_info: HashMap<MessageId, MessageTreeNode>,
}

impl ChatPreBranchInfo {
    pub fn new(last_sequence_id: Option<MessageId>) -> Self {
        Self {
            last_sequence_id,
            message_tree_info: HashMap::new(),
        }
    }

    pub fn with_node<I, C>(mut self, id: I, parent_id: Option<I>, child_ids: C) -> Self
    where
        I: Into<MessageId>,
        C: IntoIterator<Item = I>,
    {
        self.message_tree_info.insert(
            id.into(),
            MessageTreeNode {
                parent_id: parent_id.map(Into::into),
                child_ids: child_ids.into_iter().map(Into::into).collect(),
            },
        );
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChatMutationPlan {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create: Option<MessageCreate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub update: Vec<MessageUpdate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub delete: Vec<MessageRef>,
}

impl ChatMutationPlan {
    pub fn is_empty(&self) -> bool {
        self.create.is_none() && self.update.is_empty() && self.delete.is_empty()
    }
}
