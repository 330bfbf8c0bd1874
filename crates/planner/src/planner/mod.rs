mod create_chain;
mod reparent;

use std::collections::HashSet;

use tracing::debug;

use super::ChatMutationPlanner;
use super::error::{BatchTooLargeSnafu, DuplicateIdSnafu, InvalidIdSnafu, PlanResult};
use super::ids::MessageId;
use super::settings::PlannerSettings;
use super::types::{ChatMessageOperations, ChatMutationPlan, ChatPreBranchInfo, UpdateParent};
use create_chain::{FlatCreate, FlatParent};

/// Plans one chat mutation request with default settings.
///
/// Returns `Ok(None)` when the batch carries no operations.
pub fn prepare_chat_message_operations(
    operations: &ChatMessageOperations,
    branch_info: &ChatPreBranchInfo,
) -> PlanResult<Option<ChatMutationPlan>> {
    MessageTreePlanner::default().plan(operations, branch_info)
}

#[derive(Debug, Clone, Default)]
pub struct MessageTreePlanner {
    settings: PlannerSettings,
}

impl MessageTreePlanner {
    pub fn new(settings: PlannerSettings) -> Self {
        Self {
            settings: settings.normalized(),
        }
    }

    pub fn settings(&self) -> &PlannerSettings {
        &self.settings
    }

    fn validate(
        &self,
        creates: &[FlatCreate<'_>],
        operations: &ChatMessageOperations,
    ) -> PlanResult<()> {
        let count = creates.len() + operations.update.len() + operations.delete.len();
        if count > self.settings.max_batch_operations {
            return BatchTooLargeSnafu {
                stage: "validate-batch-size",
                count,
                limit: self.settings.max_batch_operations,
            }
            .fail();
        }

        let create_parents = creates.iter().filter_map(|record| match record.parent {
            FlatParent::Connect(id) => Some(id),
            _ => None,
        });
        let update_parents = operations.update.iter().filter_map(|record| match &record.parent {
            Some(UpdateParent::Connect(id)) => Some(id),
            _ => None,
        });
        let ids = creates
            .iter()
            .map(|record| record.id)
            .chain(create_parents)
            .chain(operations.update.iter().map(|record| &record.id))
            .chain(update_parents)
            .chain(operations.delete.iter().map(|record| &record.id));
        for id in ids {
            if id.is_blank() {
                return InvalidIdSnafu {
                    stage: "validate-batch-ids",
                    id_type: "message-id",
                    raw: id.to_string(),
                }
                .fail();
            }
        }

        ensure_unique("create", creates.iter().map(|record| record.id))?;
        ensure_unique("update", operations.update.iter().map(|record| &record.id))
    }
}

impl ChatMutationPlanner for MessageTreePlanner {
    fn plan(
        &self,
        operations: &ChatMessageOperations,
        branch_info: &ChatPreBranchInfo,
    ) -> PlanResult<Option<ChatMutationPlan>> {
        if operations.is_empty() {
            debug!("no chat message operations to plan");
            return Ok(None);
        }
        let creates = create_chain::flatten(&operations.create);
        self.validate(&creates, operations)?;

        let create = create_chain::assemble(&creates, branch_info.last_sequence_id.as_ref())?;
        let reparented = reparent::plan(&operations.delete, &branch_info.message_tree_info)?;

        let mut update = operations.update.clone();
        update.extend(reparented);

        let plan = ChatMutationPlan {
            create,
            update,
            delete: operations.delete.clone(),
        };

        debug!(
            creates = creates.len(),
            updates = plan.update.len(),
            deletes = plan.delete.len(),
            "planned chat message mutation"
        );
        Ok((!plan.is_empty()).then_some(plan))
    }
}

fn ensure_unique<'a>(
    list: &'static str,
    ids: impl Iterator<Item = &'a MessageId>,
) -> PlanResult<()> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return DuplicateIdSnafu {
                stage: "validate-batch-unique",
                list,
                id: id.clone(),
            }
            .fail();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests;
