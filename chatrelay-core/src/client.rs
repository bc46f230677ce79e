use secrecy::{ExposeSecret, SecretString};
use tokio_util::sync::CancellationToken;

use crate::config::{Config, StreamCfg};
use crate::error::{CoreResult, RelayError};
use crate::http_client::{HttpClient, RequestCtx};
use crate::model::{
    ChatMessageReq, ConversationVarPage, GetConversationVarReq, WorkflowReq, WorkflowRes,
};
use crate::relay::{RelayController, RelayHooks, StreamOutcome};
use crate::sink::FrameSink;
use crate::stream::FrameStream;

pub const CHAT_MESSAGES_PATH: &str = "/v1/chat-messages";
pub const WORKFLOW_RUN_PATH: &str = "/v1/workflows/run";

/// Client for one chat backend. Built once from `Config` and shared by reference;
/// every call owns its own stream state.
#[derive(Debug, Clone)]
pub struct ChatClient {
    http: HttpClient,
    base: String,
    api_key: SecretString,
    max_event_bytes: usize,
}

impl ChatClient {
    pub fn new(http: HttpClient, api_key: SecretString, base: String) -> Self {
        Self {
            http,
            api_key,
            base: base.trim_end_matches('/').to_string(),
            max_event_bytes: StreamCfg::default().max_event_bytes,
        }
    }

    pub fn with_max_event_bytes(mut self, max_event_bytes: usize) -> Self {
        self.max_event_bytes = max_event_bytes;
        self
    }

    /// Build from configuration; the API key is read from `backend.api_key_env`.
    pub fn from_config(cfg: &Config) -> CoreResult<Self> {
        let env = &cfg.backend.api_key_env;
        let key = std::env::var(env).map_err(|_| {
            RelayError::Validation(format!("environment variable '{env}' is not set"))
        })?;
        Self::from_config_with_key(cfg, SecretString::from(key))
    }

    pub fn from_config_with_key(cfg: &Config, api_key: SecretString) -> CoreResult<Self> {
        cfg.validate()?;
        let http = HttpClient::new(&cfg.http)?;
        Ok(Self::new(http, api_key, cfg.backend.base_url.clone())
            .with_max_event_bytes(cfg.stream.max_event_bytes))
    }

    #[cfg(test)]
    pub fn new_for_tests(server_base: &str) -> Self {
        ChatClient::new(
            HttpClient::new_default().unwrap(),
            SecretString::from("test-key"),
            server_base.to_string(),
        )
    }

    fn headers(&self) -> Vec<(String, String)> {
        vec![(
            "Authorization".to_string(),
            format!("Bearer {}", self.api_key.expose_secret()),
        )]
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// Open the chat stream without consuming it.
    pub async fn open_chat_stream(&self, req: ChatMessageReq) -> CoreResult<FrameStream> {
        let req = req.into_streaming();
        let owned_headers = self.headers();
        let hdrs: Vec<(&str, &str)> = owned_headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        self.http
            .post_sse(
                &self.url(CHAT_MESSAGES_PATH),
                &req,
                &hdrs,
                &RequestCtx::default(),
                self.max_event_bytes,
            )
            .await
    }

    /// Send a chat message and reduce the streamed reply into one outcome.
    /// Failing to establish the stream is a `TransportFailure`.
    pub async fn stream_chat(
        &self,
        req: ChatMessageReq,
        hooks: RelayHooks<'_>,
        cancel: &CancellationToken,
    ) -> StreamOutcome {
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return StreamOutcome::Cancelled,
            opened = self.open_chat_stream(req) => opened,
        };
        let frames = match opened {
            Ok(frames) => frames,
            Err(e) => {
                tracing::warn!(error = %e, "failed to open chat stream");
                return StreamOutcome::TransportFailure(e);
            }
        };
        RelayController::new(cancel.clone()).run(frames, hooks).await
    }

    /// Proxy mode: every upstream frame is forwarded to `sink` as it arrives, then
    /// the frames built by `appendix` from the outcome are appended best-effort.
    pub async fn proxy_stream_chat<F>(
        &self,
        req: ChatMessageReq,
        sink: &mut dyn FrameSink,
        on_answer_changed: Option<Box<dyn FnMut(&str) + Send + '_>>,
        appendix: F,
        cancel: &CancellationToken,
    ) -> StreamOutcome
    where
        F: FnOnce(&StreamOutcome) -> Vec<String>,
    {
        let outcome = {
            let hooks = RelayHooks {
                on_answer_changed,
                on_raw_frame: Some(&mut *sink),
            };
            self.stream_chat(req, hooks, cancel).await
        };
        RelayController::append_frames(sink, appendix(&outcome)).await;
        outcome
    }

    pub async fn conversation_variables(
        &self,
        req: &GetConversationVarReq,
    ) -> CoreResult<ConversationVarPage> {
        if req.conversation_id.is_empty() {
            return Err(RelayError::Validation("conversation_id is required".into()));
        }
        let owned_headers = self.headers();
        let hdrs: Vec<(&str, &str)> = owned_headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let url = self.url(&format!("/v1/conversations/{}/variables", req.conversation_id));
        self.http
            .get_json(&url, &req.query_pairs(), &hdrs, &RequestCtx::default())
            .await
    }

    /// Run a workflow to completion (blocking response mode).
    pub async fn run_workflow(&self, mut req: WorkflowReq) -> CoreResult<WorkflowRes> {
        req.response_mode = "blocking".into();
        let owned_headers = self.headers();
        let hdrs: Vec<(&str, &str)> = owned_headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        self.http
            .post_json(&self.url(WORKFLOW_RUN_PATH), &req, &hdrs, &RequestCtx::default())
            .await
    }
}
