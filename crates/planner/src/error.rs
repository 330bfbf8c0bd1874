use snafu::Snafu;

use super::ids::MessageId;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum PlanError {
    #[snafu(display(
        "create batch branches into {} independent chains (leaves: {})",
        leaves.len(),
        join_ids(leaves)
    ))]
    BranchingDetected {
        stage: &'static str,
        leaves: Vec<MessageId>,
    },
    #[snafu(display("message '{id}' is being deleted but has no tree topology entry"))]
    MissingTreeTopology { stage: &'static str, id: MessageId },
    #[snafu(display("message id '{id}' appears more than once in the {list} list"))]
    DuplicateId {
        stage: &'static str,
        list: &'static str,
        id: MessageId,
    },
    #[snafu(display("value '{raw}' is not a valid {id_type}"))]
    InvalidId {
        stage: &'static str,
        id_type: &'static str,
        raw: String,
    },
    #[snafu(display("batch carries {count} operations, limit is {limit}"))]
    BatchTooLarge {
        stage: &'static str,
        count: usize,
        limit: usize,
    },
}

impl PlanError {
    pub fn stage(&self) -> &'static str {
        match self {
            Self::BranchingDetected { stage, .. }
            | Self::MissingTreeTopology { stage, .. }
            | Self::DuplicateId { stage, .. }
            | Self::InvalidId { stage, .. }
            | Self::BatchTooLarge { stage, .. } => *stage,
        }
    }
}

pub type PlanResult<T> = Result<T, PlanError>;

fn join_ids(ids: &[MessageId]) -> String {
    ids.iter()
        .map(MessageId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
