pub mod error;
pub mod ids;
pub mod planner;
pub mod settings;
pub mod types;

pub use error::{PlanError, PlanResult};
pub use ids::MessageId;
pub use planner::{MessageTreePlanner, prepare_chat_message_operations};
pub use settings::{PlannerSettings, SettingsError, SettingsStore};
pub use types::{
    ChatMessageOperations, ChatMutationPlan, ChatPreBranchInfo, CreateInputParent, CreateParent,
    MessageCreate, MessageCreateInput, MessageFields, MessageRef, MessageTreeNode, MessageUpdate,
    UpdateParent,
};

/// Turns a batch of message operations plus a topology snapshot into one
/// mutation plan for the persistence layer to apply atomically.
pub trait ChatMutationPlanner: Send + Sync {
    fn plan(
        &self,
        operations: &ChatMessageOperations,
        branch_info: &ChatPreBranchInfo,
    ) -> PlanResult<Option<ChatMutationPlan>>;
}
