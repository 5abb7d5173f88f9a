use crate::{ContextPackBudget, ContextPackItem};
use serde::{Deserialize, Serialize};

pub const TASK_PACK_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TaskPackItem {
    #[serde(flatten)]
    pub item: ContextPackItem,
    #[serde(default)]
    pub why: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "snake_case")]
pub enum NextActionKind {
    OpenFile,
    Run,
    Query,
    UpdateContract,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NextAction {
    pub kind: NextActionKind,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TaskPackOutput {
    pub version: u32,
    pub intent: String,
    pub model_id: String,
    pub profile: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    pub items: Vec<TaskPackItem>,
    pub next_actions: Vec<NextAction>,
    pub budget: ContextPackBudget,
}

impl TaskPackOutput {
    /// Wraps a [`ContextPackOutput`](crate::ContextPackOutput) with a
    /// task-shaped envelope: every item gets an `open_file` next action so
    /// an agent has a concrete follow-up for each piece of context handed
    /// back, without inventing a rationale beyond "this is where the match
    /// lives".
    #[must_use]
    pub fn from_context_pack(intent: &str, pack: crate::ContextPackOutput) -> Self {
        let next_actions = pack
            .items
            .iter()
            .map(|item| NextAction {
                kind: NextActionKind::OpenFile,
                reason: format!("ranked match for {:?}", pack.query),
                file: Some(item.file.clone()),
                command: None,
                query: None,
            })
            .collect();

        let items = pack
            .items
            .into_iter()
            .map(|item| TaskPackItem {
                item,
                why: Vec::new(),
            })
            .collect();

        Self {
            version: TASK_PACK_VERSION,
            intent: intent.to_string(),
            model_id: pack.model_id,
            profile: pack.profile,
            digest: None,
            items,
            next_actions,
            budget: pack.budget,
        }
    }
}
