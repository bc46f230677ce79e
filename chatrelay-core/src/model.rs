use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransferMethod {
    RemoteUrl,
    LocalFile,
}

/// A file attached to a chat message, referenced either by URL or by upload id.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct FileInput {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer_method: Option<TransferMethod>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub upload_file_id: String,
}

impl FileInput {
    pub fn by_upload_id(upload_file_id: impl Into<String>) -> Self {
        Self {
            kind: "document".into(),
            transfer_method: Some(TransferMethod::LocalFile),
            upload_file_id: upload_file_id.into(),
            ..Default::default()
        }
    }

    /// Upload id wins over URL; with neither, the method is left as given.
    fn derive_transfer_method(&mut self) {
        if !self.upload_file_id.is_empty() {
            self.transfer_method = Some(TransferMethod::LocalFile);
        } else if !self.url.is_empty() {
            self.transfer_method = Some(TransferMethod::RemoteUrl);
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct ChatMessageReq {
    pub query: String,
    #[serde(default)]
    pub response_mode: String,
    pub user: String,
    #[serde(default)]
    pub conversation_id: String,
    #[serde(default)]
    pub inputs: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub files: Vec<FileInput>,
}

impl ChatMessageReq {
    pub fn new(query: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            user: user.into(),
            ..Default::default()
        }
    }

    /// Force streaming mode and fill in each file's transfer method.
    pub fn into_streaming(mut self) -> Self {
        self.response_mode = "streaming".into();
        for f in &mut self.files {
            f.derive_transfer_method();
        }
        self
    }
}

/// Knowledge-base chunk cited by the answer, reported at `message_end`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct RetrieverResource {
    #[serde(default)]
    pub position: i64,
    #[serde(default)]
    pub dataset_id: String,
    #[serde(default)]
    pub dataset_name: String,
    #[serde(default)]
    pub document_id: String,
    #[serde(default)]
    pub segment_id: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GetConversationVarReq {
    pub conversation_id: String,
    pub user: String,
    pub last_id: Option<String>,
    pub limit: Option<u32>,
    pub variable_name: Option<String>,
}

impl GetConversationVarReq {
    pub(crate) fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut q = vec![("user", self.user.clone())];
        if let Some(last) = &self.last_id {
            q.push(("last_id", last.clone()));
        }
        if let Some(limit) = self.limit {
            q.push(("limit", limit.to_string()));
        }
        if let Some(name) = &self.variable_name {
            q.push(("variable_name", name.clone()));
        }
        q
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ConversationVarPage {
    pub limit: u32,
    pub has_more: bool,
    #[serde(default)]
    pub data: Vec<ConversationVar>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ConversationVar {
    pub id: String,
    pub name: String,
    pub value_type: String,
    pub value: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct WorkflowReq {
    pub inputs: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub response_mode: String,
    pub user: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct WorkflowRes {
    pub workflow_run_id: String,
    pub task_id: String,
    pub data: WorkflowRunData,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct WorkflowRunData {
    pub id: String,
    pub workflow_id: String,
    pub status: String,
    #[serde(default)]
    pub outputs: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub elapsed_time: f64,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub total_steps: u64,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub finished_at: i64,
}
