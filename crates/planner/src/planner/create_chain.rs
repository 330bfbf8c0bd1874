use std::collections::HashMap;

use tracing::{debug, warn};

use crate::error::{BranchingDetectedSnafu, PlanResult};
use crate::ids::MessageId;
use crate::types::{
    CreateInputParent, CreateParent, MessageCreate, MessageCreateInput, MessageFields, MessageRef,
};

/// One create record once nested `parent.create` inputs are unfolded.
#[derive(Debug, Clone, Copy)]
pub(super) struct FlatCreate<'a> {
    pub(super) id: &'a MessageId,
    pub(super) fields: &'a MessageFields,
    pub(super) parent: FlatParent<'a>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum FlatParent<'a> {
    Absent,
    Connect(&'a MessageId),
    /// The record at this position of the flattened list.
    Nested(usize),
}

/// Unfolds nested input creates into one list; a nested parent lands right
/// after the record that names it.
pub(super) fn flatten(records: &[MessageCreateInput]) -> Vec<FlatCreate<'_>> {
    let mut flat = Vec::with_capacity(records.len());
    for record in records {
        let mut cursor = Some(record);
        while let Some(current) = cursor {
            let (parent, next) = match &current.parent {
                None => (FlatParent::Absent, None),
                Some(CreateInputParent::Connect(target)) => (FlatParent::Connect(&target.id), None),
                Some(CreateInputParent::Create(nested)) => {
                    (FlatParent::Nested(flat.len() + 1), Some(nested.as_ref()))
                }
            };
            flat.push(FlatCreate {
                id: &current.id,
                fields: &current.fields,
                parent,
            });
            cursor = next;
        }
    }
    flat
}

/// Where a create record hangs in the chain being assembled.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Link {
    /// Another record of the same batch, by position.
    Batch(usize),
    /// Outside the batch: an existing message, or nothing at all.
    Anchor(Option<MessageId>),
}

/// Folds a flattened create batch into one nested create, leaf outermost.
///
/// Records are expected to carry unique, non-blank ids. A record without a
/// parent hangs off the previous parentless record in submission order; the
/// first one hangs off `last_sequence_id`.
pub(super) fn assemble(
    records: &[FlatCreate<'_>],
    last_sequence_id: Option<&MessageId>,
) -> PlanResult<Option<MessageCreate>> {
    let Some(last_position) = records.len().checked_sub(1) else {
        return Ok(None);
    };

    let links = resolve_links(records, last_sequence_id);

    let mut has_child = vec![false; records.len()];
    for link in &links {
        if let Link::Batch(parent) = link {
            has_child[*parent] = true;
        }
    }
    let leaves = (0..records.len())
        .filter(|position| !has_child[*position])
        .collect::<Vec<_>>();

    if leaves.len() > 1 {
        return BranchingDetectedSnafu {
            stage: "create-chain-find-leaf",
            leaves: leaves
                .iter()
                .map(|position| records[*position].id.clone())
                .collect::<Vec<_>>(),
        }
        .fail();
    }

    // No leaf means every record sits on a cycle; any entry point will do.
    let start = leaves.first().copied().unwrap_or(last_position);
    let (chain, anchor) = walk_up(start, &links, records);

    if chain.len() < records.len() {
        let dropped = unreachable_ids(&chain, records);
        warn!(
            dropped = ?dropped,
            "create batch has records unreachable from its leaf, dropping them"
        );
    }

    let mut root_parent = anchor.map(|id| CreateParent::Connect(MessageRef { id }));
    let mut nested: Option<MessageCreate> = None;
    for position in chain.iter().rev() {
        let record = &records[*position];
        let parent = match nested.take() {
            Some(ancestor) => Some(CreateParent::Create(Box::new(ancestor))),
            None => root_parent.take(),
        };
        nested = Some(MessageCreate {
            id: (*record.id).clone(),
            parent,
            fields: record.fields.clone(),
        });
    }

    debug!(
        records = records.len(),
        chained = chain.len(),
        "assembled nested create chain"
    );
    Ok(nested)
}

fn resolve_links(
    records: &[FlatCreate<'_>],
    last_sequence_id: Option<&MessageId>,
) -> Vec<Link> {
    let positions = records
        .iter()
        .enumerate()
        .map(|(position, record)| (record.id, position))
        .collect::<HashMap<_, _>>();

    let mut previous_parentless = None;
    records
        .iter()
        .enumerate()
        .map(|(position, record)| match record.parent {
            FlatParent::Nested(parent) => Link::Batch(parent),
            FlatParent::Connect(parent_id) => match positions.get(parent_id) {
                Some(parent) => Link::Batch(*parent),
                None => Link::Anchor(Some(parent_id.clone())),
            },
            FlatParent::Absent => {
                let link = match previous_parentless {
                    Some(previous) => Link::Batch(previous),
                    None => Link::Anchor(last_sequence_id.cloned()),
                };
                previous_parentless = Some(position);
                link
            }
        })
        .collect()
}

/// Returns the positions from `start` up to the chain root, plus the root's
/// anchor. A link back into the visited set ends the chain with no anchor.
fn walk_up(
    start: usize,
    links: &[Link],
    records: &[FlatCreate<'_>],
) -> (Vec<usize>, Option<MessageId>) {
    let mut visited = vec![false; links.len()];
    let mut chain = Vec::new();
    let mut cursor = Some(start);
    let mut anchor = None;

    while let Some(position) = cursor {
        visited[position] = true;
        chain.push(position);
        cursor = match &links[position] {
            Link::Batch(parent) if !visited[*parent] => Some(*parent),
            Link::Batch(parent) => {
                debug!(
                    id = %records[position].id,
                    parent = %records[*parent].id,
                    "create chain loops back, cutting parent link"
                );
                None
            }
            Link::Anchor(target) => {
                anchor = target.clone();
                None
            }
        };
    }

    (chain, anchor)
}

fn unreachable_ids(chain: &[usize], records: &[FlatCreate<'_>]) -> Vec<String> {
    let mut reached = vec![false; records.len()];
    for position in chain {
        reached[*position] = true;
    }
    records
        .iter()
        .zip(reached)
        .filter(|(_, reached)| !reached)
        .map(|(record, _)| record.id.to_string())
        .collect()
}
