use std::collections::{HashMap, HashSet};

use snafu::OptionExt;
use tracing::{debug, warn};

use crate::error::{MissingTreeTopologySnafu, PlanResult};
use crate::ids::MessageId;
use crate::types::{MessageRef, MessageTreeNode, MessageUpdate, UpdateParent};

/// Builds the parent updates that keep the tree connected once `deletes`
/// are applied.
///
/// Every child of every deleted message gets exactly one update, including
/// children that are deleted in the same batch.
pub(super) fn plan(
    deletes: &[MessageRef],
    tree: &HashMap<MessageId, MessageTreeNode>,
) -> PlanResult<Vec<MessageUpdate>> {
    let nodes = deletes
        .iter()
        .map(|deleted| {
            tree.get(&deleted.id)
                .map(|node| (&deleted.id, node))
                .context(MissingTreeTopologySnafu {
                    stage: "reparent-load-topology",
                    id: deleted.id.clone(),
                })
        })
        .collect::<PlanResult<Vec<_>>>()?;

    let deleted = deletes.iter().map(|entry| &entry.id).collect::<HashSet<_>>();
    let mut reparented = HashSet::new();
    let mut updates = Vec::new();

    for (id, node) in nodes {
        if node.child_ids.is_empty() {
            continue;
        }

        let target = nearest_surviving_ancestor(node.parent_id.as_ref(), &deleted, tree)?;
        debug!(
            deleted = %id,
            target = target.as_ref().map(MessageId::as_str).unwrap_or("<root>"),
            children = node.child_ids.len(),
            "re-parenting children of deleted message"
        );

        for child in &node.child_ids {
            if !reparented.insert(child) {
                debug!(child = %child, "child listed under several deleted parents");
                continue;
            }

            let parent = match &target {
                Some(ancestor) => UpdateParent::Connect(ancestor.clone()),
                None => UpdateParent::Disconnect,
            };
            updates.push(MessageUpdate::reparent(child.clone(), parent));
        }
    }

    Ok(updates)
}

fn nearest_surviving_ancestor(
    start: Option<&MessageId>,
    deleted: &HashSet<&MessageId>,
    tree: &HashMap<MessageId, MessageTreeNode>,
) -> PlanResult<Option<MessageId>> {
    let mut visited = HashSet::new();
    let mut cursor = start;

    while let Some(candidate) = cursor {
        if !deleted.contains(candidate) {
            return Ok(Some(candidate.clone()));
        }
        if !visited.insert(candidate) {
            warn!(
                id = %candidate,
                "deleted ancestors form a cycle, treating children as new roots"
            );
            return Ok(None);
        }

        let node = tree.get(candidate).context(MissingTreeTopologySnafu {
            stage: "reparent-walk-ancestors",
            id: candidate.clone(),
        })?;
        cursor = node.parent_id.as_ref();
    }

    Ok(None)
}
