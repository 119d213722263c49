//! Chat Session
//!
//! Owns everything one conversation needs: history, the stream aggregator,
//! attached files and UI state. Front ends call into it and render what it
//! emits on the sink.
//!
//! # Lock order
//!
//! The aggregator locks the conversation while it holds its own lock. This
//! type therefore never takes the aggregator lock while holding the
//! conversation lock, and never holds either across an await.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::backend::{ChatRequest, HttpStreamRequest, Transport};
use crate::config::AssistantConfig;
use crate::context::{build_code_context, build_system_prompt, ContextProvider, FileContext};
use crate::conversation::ConversationStore;
use crate::error::Result;
use crate::messages::{ChatMessage, EventSink, SinkMessage};
use crate::persistence::{ChatState, StateStore, UiState, UiStatePatch};
use crate::streaming::{drive_stream, StreamAggregator, StreamState};

/// Per-session request settings
#[derive(Clone)]
pub struct SessionSettings {
    /// Chat completions endpoint
    pub endpoint: String,
    /// Bearer token (empty sends no Authorization header)
    pub api_key: String,
    /// Model identifier
    pub model: String,
    /// Maximum tokens per response
    pub max_tokens: u32,
    /// Window for the first data line
    pub watchdog_timeout: Duration,
    /// Conversation length cap
    pub max_history: usize,
    /// Project files kept in saved state
    pub max_project_files: usize,
}

impl SessionSettings {
    /// Take the request-related parts of a loaded configuration
    #[must_use]
    pub fn from_config(config: &AssistantConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            watchdog_timeout: config.watchdog_timeout,
            max_history: config.max_history,
            max_project_files: config.max_project_files,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&AssistantConfig::default())
    }
}

impl std::fmt::Debug for SessionSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSettings")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("watchdog_timeout", &self.watchdog_timeout)
            .field("max_history", &self.max_history)
            .field("max_project_files", &self.max_project_files)
            .finish_non_exhaustive()
    }
}

/// Cancels the in-flight stream from another task
#[derive(Clone, Debug)]
pub struct StreamHandle {
    aggregator: Arc<Mutex<StreamAggregator>>,
}

impl StreamHandle {
    /// Abort the active stream, returning whether one was running
    pub fn cancel(&self) -> bool {
        self.aggregator.lock().cancel().is_some()
    }

    /// Whether a stream is running
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.aggregator.lock().is_active()
    }
}

/// One conversation with the assistant
pub struct ChatSession<T: Transport> {
    transport: T,
    provider: Arc<dyn ContextProvider>,
    store: Arc<dyn StateStore>,
    sink: Arc<dyn EventSink>,
    conversation: Arc<Mutex<ConversationStore>>,
    aggregator: Arc<Mutex<StreamAggregator>>,
    files: FileContext,
    ui: UiState,
    settings: SessionSettings,
}

impl<T: Transport> ChatSession<T> {
    /// Create an empty session
    pub fn new(
        transport: T,
        provider: Arc<dyn ContextProvider>,
        store: Arc<dyn StateStore>,
        sink: Arc<dyn EventSink>,
        settings: SessionSettings,
    ) -> Self {
        let conversation = Arc::new(Mutex::new(ConversationStore::new(settings.max_history)));
        let aggregator = Arc::new(Mutex::new(StreamAggregator::new(
            Arc::clone(&sink),
            Arc::clone(&conversation),
        )));

        Self {
            transport,
            provider,
            store,
            sink,
            conversation,
            aggregator,
            files: FileContext::new(),
            ui: UiState::default(),
            settings,
        }
    }

    /// Request settings
    #[must_use]
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// The transport in use
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Attached files
    #[must_use]
    pub fn files(&self) -> &FileContext {
        &self.files
    }

    /// Panel layout and toggles
    #[must_use]
    pub fn ui_state(&self) -> UiState {
        self.ui
    }

    /// Full history snapshot, system message included
    #[must_use]
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.conversation.lock().messages().to_vec()
    }

    /// State of the most recent stream
    #[must_use]
    pub fn stream_state(&self) -> StreamState {
        self.aggregator.lock().state()
    }

    /// Handle for cancelling the active stream
    #[must_use]
    pub fn abort_handle(&self) -> StreamHandle {
        StreamHandle {
            aggregator: Arc::clone(&self.aggregator),
        }
    }

    /// Load saved state, returning whether any was found
    ///
    /// Saved files that no longer exist are dropped. The file list and
    /// history are emitted either way.
    ///
    /// # Errors
    ///
    /// Fails if the store cannot be read or holds an unreadable blob.
    pub async fn restore(&mut self) -> Result<bool> {
        let Some(state) = ChatState::load(self.store.as_ref()).await? else {
            tracing::debug!("No saved chat state");
            self.emit_files();
            self.emit_history();
            return Ok(false);
        };

        self.ui = state.ui();
        self.conversation.lock().restore(state.conversation_history);

        let mut files =
            FileContext::from_saved(state.current_file_context.as_deref(), &state.project_files);
        let missing = files.retain_existing(self.provider.as_ref()).await;
        self.files = files;

        tracing::info!(
            messages = self.conversation.lock().len(),
            files = self.files.files_to_show().len(),
            missing,
            "Restored chat state"
        );

        self.emit_files();
        self.emit_history();
        Ok(true)
    }

    /// Send one user message and stream the answer
    ///
    /// Returns the terminal state of the stream. Stream failures are
    /// reported on the sink, not as an `Err`.
    ///
    /// # Errors
    ///
    /// Fails only if the state cannot be saved afterwards.
    pub async fn submit(&mut self, text: &str) -> Result<StreamState> {
        self.sink.emit(SinkMessage::StartLoading);
        self.refresh_system_context().await;

        let messages = {
            let mut conversation = self.conversation.lock();
            conversation.append_user(text);
            conversation.messages().to_vec()
        };

        let body = ChatRequest::new(self.settings.model.clone(), messages)
            .with_max_tokens(self.settings.max_tokens);
        let mut request = HttpStreamRequest::new(self.settings.endpoint.clone(), body);
        if !self.settings.api_key.is_empty() {
            request = request.with_bearer(self.settings.api_key.clone());
        }

        let ticket = self.aggregator.lock().start();
        let state = drive_stream(
            &self.transport,
            &self.aggregator,
            ticket,
            &request,
            self.settings.watchdog_timeout,
        )
        .await;

        if let Some(summary) = self.aggregator.lock().last_summary() {
            tracing::info!(
                stream_id = %summary.id,
                state = ?summary.state,
                content_bytes = summary.content_bytes,
                reasoning_bytes = summary.reasoning_bytes,
                elapsed_ms = u64::try_from(summary.elapsed.as_millis()).unwrap_or(u64::MAX),
                "Answer finished"
            );
        }

        self.save_state().await?;
        Ok(state)
    }

    /// Forget the conversation and unpin project files
    ///
    /// The current file stays attached.
    ///
    /// # Errors
    ///
    /// Fails if the state cannot be saved.
    pub async fn clear_history(&mut self) -> Result<()> {
        self.conversation.lock().reset();
        self.files.clear_pinned();
        self.refresh_system_context().await;

        self.sink.emit(SinkMessage::Cleared);
        self.emit_files();
        self.save_state().await
    }

    /// Pin project files, returning how many were new
    ///
    /// # Errors
    ///
    /// Fails if the state cannot be saved.
    pub async fn add_files<S: AsRef<str> + Sync>(&mut self, paths: &[S]) -> Result<usize> {
        let added = self.files.add_files(paths);
        if added > 0 {
            self.refresh_system_context().await;
        }
        self.emit_files();
        self.save_state().await?;
        Ok(added)
    }

    /// Detach a file, returning whether it was attached
    ///
    /// # Errors
    ///
    /// Fails if the state cannot be saved.
    pub async fn remove_file(&mut self, path: &str) -> Result<bool> {
        let removed = self.files.remove_file(path);
        self.refresh_system_context().await;
        self.emit_files();
        self.save_state().await?;
        Ok(removed)
    }

    /// The active editor file changed
    ///
    /// # Errors
    ///
    /// Fails if the state cannot be saved.
    pub async fn set_current_file(&mut self, path: Option<&str>) -> Result<()> {
        self.files.set_current_file(path);
        self.refresh_system_context().await;
        self.emit_files();
        self.save_state().await
    }

    /// A file was written to disk, returning whether it is in context
    pub async fn file_saved(&mut self, path: &str) -> bool {
        if !self.files.contains(path) {
            return false;
        }
        self.refresh_system_context().await;
        self.emit_files();
        true
    }

    /// Merge a UI state change and persist it
    ///
    /// # Errors
    ///
    /// Fails if the state cannot be saved.
    pub async fn update_ui_state(&mut self, patch: UiStatePatch) -> Result<()> {
        self.ui.apply(patch);
        self.save_state().await
    }

    /// Presentable history: no system message, duplicates collapsed
    #[must_use]
    pub fn history(&self) -> Vec<ChatMessage> {
        self.conversation
            .lock()
            .deduped_view()
            .cloned()
            .collect()
    }

    /// Emit the presentable history on the sink
    pub fn emit_history(&self) {
        self.sink.emit(SinkMessage::History {
            history: self.history(),
        });
    }

    fn emit_files(&self) {
        self.sink.emit(SinkMessage::FilesUpdated {
            files: self.files.files_to_show(),
        });
    }

    /// Rebuild the system message from the attached files
    ///
    /// A current file that no longer exists is detached first.
    pub async fn refresh_system_context(&mut self) {
        if let Some(current) = self.files.current_file() {
            if !self.provider.exists(current).await {
                tracing::debug!(path = current, "Current file no longer exists");
                self.files.set_current_file(None);
            }
        }

        let code_context = build_code_context(&self.files, self.provider.as_ref()).await;
        self.conversation
            .lock()
            .set_system_message(build_system_prompt(&code_context));
    }

    /// Persist history, files and UI state
    ///
    /// # Errors
    ///
    /// Fails if the store rejects the write.
    pub async fn save_state(&self) -> Result<()> {
        let conversation_history = {
            let mut conversation = self.conversation.lock();
            conversation.trim();
            conversation.messages().to_vec()
        };

        // The in-memory pin list stays uncapped until the next restore
        let mut saved_files = self.files.clone();
        saved_files.cap_project_files(self.settings.max_project_files);

        let state = ChatState {
            is_reasoning_expanded: self.ui.is_reasoning_expanded,
            conversation_history,
            project_files: saved_files.project_files().to_vec(),
            current_file_context: saved_files.current_file().map(String::from),
            chat_height: self.ui.chat_height,
            input_height: self.ui.input_height,
        };

        state.save(self.store.as_ref()).await?;
        Ok(())
    }
}

impl<T: Transport> std::fmt::Debug for ChatSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("transport", &self.transport.name())
            .field("settings", &self.settings)
            .field("files", &self.files)
            .field("stream_state", &self.stream_state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{data_line, ScriptedResponse, ScriptedTransport};
    use crate::context::{normalize_path, FsContextProvider};
    use crate::error::StreamError;
    use crate::messages::{MessageRole, RecordingSink};
    use crate::persistence::MemoryStore;
    use pretty_assertions::assert_eq;

    struct Fixture {
        session: ChatSession<ScriptedTransport>,
        sink: Arc<RecordingSink>,
        store: Arc<MemoryStore>,
        dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new(transport: ScriptedTransport) -> Self {
            let sink = Arc::new(RecordingSink::new());
            let store = Arc::new(MemoryStore::new());
            let settings = SessionSettings {
                api_key: "sk-test".to_string(),
                ..SessionSettings::default()
            };
            let session = ChatSession::new(
                transport,
                Arc::new(FsContextProvider::new()),
                store.clone(),
                sink.clone(),
                settings,
            );
            Self {
                session,
                sink,
                store,
                dir: tempfile::tempdir().unwrap(),
            }
        }

        fn write_file(&self, name: &str, text: &str) -> String {
            let path = self.dir.path().join(name);
            std::fs::write(&path, text).unwrap();
            normalize_path(&path.to_string_lossy())
        }

        fn missing_file(&self, name: &str) -> String {
            normalize_path(&self.dir.path().join(name).to_string_lossy())
        }

        async fn saved(&self) -> ChatState {
            ChatState::load(self.store.as_ref()).await.unwrap().unwrap()
        }
    }

    fn hello_body() -> ScriptedResponse {
        let body = format!("{}{}data: [DONE]\n", data_line("Hel", ""), data_line("lo", ""));
        ScriptedResponse::split(&body, 5)
    }

    #[tokio::test]
    async fn test_submit_streams_and_commits() {
        let mut fx = Fixture::new(ScriptedTransport::new().with_response(hello_body()));
        let main = fx.write_file("main.rs", "fn main() {}");
        fx.session.set_current_file(Some(main.as_str())).await.unwrap();
        fx.sink.take();

        let state = fx.session.submit("hi").await.unwrap();

        assert_eq!(state, StreamState::Completed);
        assert_eq!(
            fx.sink.messages(),
            vec![
                SinkMessage::StartLoading,
                SinkMessage::delta("Hel", ""),
                SinkMessage::delta("lo", ""),
                SinkMessage::EndLoading,
                SinkMessage::final_delta(),
            ]
        );

        let messages = fx.session.messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, MessageRole::System);
        assert!(messages[0].content.contains(&format!("Current File: {main}\n```rust\n")));
        assert_eq!(messages[1], ChatMessage::user("hi"));
        assert_eq!(messages[2], ChatMessage::assistant("Hello"));

        let requests = fx.session.transport().requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].body.model, "deepseek-reasoner");
        assert_eq!(requests[0].body.max_tokens, Some(2000));
        assert!(requests[0].body.stream);
        assert_eq!(requests[0].body.messages.len(), 2);
        assert!(requests[0]
            .headers
            .contains(&("Authorization".to_string(), "Bearer sk-test".to_string())));

        assert_eq!(fx.saved().await.conversation_history, messages);
    }

    #[tokio::test]
    async fn test_retry_after_failure_replaces_user_turn() {
        let transport = ScriptedTransport::new()
            .with_response(ScriptedResponse::Fail(StreamError::Transport(
                "refused".to_string(),
            )))
            .with_response(hello_body());
        let mut fx = Fixture::new(transport);

        assert_eq!(fx.session.submit("hi").await.unwrap(), StreamState::Failed);
        assert!(fx
            .sink
            .messages()
            .contains(&SinkMessage::error("DeepSeek API Error: refused")));

        assert_eq!(fx.session.submit("hi").await.unwrap(), StreamState::Completed);
        assert_eq!(
            fx.session.history(),
            vec![ChatMessage::user("hi"), ChatMessage::assistant("Hello")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_handle_cancels_stream() {
        let transport = ScriptedTransport::new().with_response(ScriptedResponse::ChunksThenHang(
            vec![data_line("partial", "").into_bytes()],
        ));
        let mut fx = Fixture::new(transport);
        let handle = fx.session.abort_handle();

        let abort = async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            assert!(handle.is_active());
            assert!(handle.cancel());
        };
        let (state, ()) = tokio::join!(fx.session.submit("question"), abort);

        assert_eq!(state.unwrap(), StreamState::Cancelled);
        assert!(!handle.cancel());
        assert_eq!(fx.session.history(), vec![ChatMessage::user("question")]);
        assert!(!fx.sink.messages().contains(&SinkMessage::EndLoading));
    }

    #[tokio::test]
    async fn test_clear_history_keeps_current_file() {
        let mut fx = Fixture::new(ScriptedTransport::new().with_response(hello_body()));
        let main = fx.write_file("main.rs", "fn main() {}");
        let lib = fx.write_file("lib.rs", "pub fn x() {}");
        fx.session.set_current_file(Some(main.as_str())).await.unwrap();
        fx.session.add_files(&[lib]).await.unwrap();
        fx.session.submit("hi").await.unwrap();
        fx.sink.take();

        fx.session.clear_history().await.unwrap();

        assert_eq!(
            fx.sink.messages(),
            vec![
                SinkMessage::Cleared,
                SinkMessage::FilesUpdated {
                    files: vec![main.clone()]
                },
            ]
        );
        assert!(fx.session.history().is_empty());
        let saved = fx.saved().await;
        assert!(saved.project_files.is_empty());
        assert_eq!(saved.current_file_context, Some(main));
        assert_eq!(saved.conversation_history.len(), 1);
    }

    #[tokio::test]
    async fn test_file_list_operations() {
        let mut fx = Fixture::new(ScriptedTransport::new());
        let main = fx.write_file("main.rs", "fn main() {}");
        let a = fx.write_file("a.py", "print(1)");
        fx.session.set_current_file(Some(main.as_str())).await.unwrap();

        let added = fx.session.add_files(&[a.clone(), main.clone(), a.clone()]).await.unwrap();
        assert_eq!(added, 1);
        assert_eq!(fx.session.files().files_to_show(), vec![main.clone(), a.clone()]);
        assert!(fx.session.messages()[0]
            .content
            .contains(&format!("Project File: {a}\n```python\nprint(1)\n```")));

        assert!(fx.session.remove_file(&a).await.unwrap());
        assert_eq!(
            fx.sink.messages().last(),
            Some(&SinkMessage::FilesUpdated {
                files: vec![main.clone()]
            })
        );
        assert!(!fx.session.messages()[0].content.contains("Project File"));

        let other = fx.missing_file("other.rs");
        assert!(fx.session.file_saved(&main).await);
        assert!(!fx.session.file_saved(&other).await);
    }

    #[tokio::test]
    async fn test_deleted_current_file_is_detached() {
        let mut fx = Fixture::new(ScriptedTransport::new());
        let main = fx.write_file("main.rs", "fn main() {}");
        fx.session.set_current_file(Some(main.as_str())).await.unwrap();
        std::fs::remove_file(&main).unwrap();

        fx.session.refresh_system_context().await;

        assert_eq!(fx.session.files().current_file(), None);
        assert!(!fx.session.messages()[0].content.contains("Current File"));
    }

    #[tokio::test]
    async fn test_restore_filters_and_dedupes() {
        let mut fx = Fixture::new(ScriptedTransport::new());
        let kept = fx.write_file("kept.rs", "");
        let gone = fx.missing_file("gone.rs");

        let saved = ChatState {
            is_reasoning_expanded: true,
            conversation_history: vec![
                ChatMessage::system("old prompt"),
                ChatMessage::user("q"),
                ChatMessage::assistant("a"),
                ChatMessage::user("q"),
                ChatMessage::assistant(""),
            ],
            project_files: vec![kept.clone(), gone.clone()],
            current_file_context: Some(gone),
            chat_height: Some(300.0),
            input_height: None,
        };
        saved.save(fx.store.as_ref()).await.unwrap();

        assert!(fx.session.restore().await.unwrap());

        assert!(fx.session.ui_state().is_reasoning_expanded);
        assert_eq!(fx.session.ui_state().chat_height, Some(300.0));
        assert_eq!(fx.session.files().current_file(), None);
        assert_eq!(
            fx.sink.messages(),
            vec![
                SinkMessage::FilesUpdated {
                    files: vec![kept]
                },
                SinkMessage::History {
                    history: vec![ChatMessage::user("q"), ChatMessage::assistant("a")]
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_restored_pin_survives_editor_switch() {
        let mut fx = Fixture::new(ScriptedTransport::new());
        let a = fx.write_file("a.rs", "fn a() {}");
        let b = fx.write_file("b.rs", "fn b() {}");
        fx.session.add_files(&[a.clone()]).await.unwrap();
        fx.session.set_current_file(Some(a.as_str())).await.unwrap();

        let sink = Arc::new(RecordingSink::new());
        let mut restored = ChatSession::new(
            ScriptedTransport::new(),
            Arc::new(FsContextProvider::new()),
            fx.store.clone(),
            sink.clone(),
            SessionSettings::default(),
        );
        assert!(restored.restore().await.unwrap());
        assert_eq!(restored.files().project_files(), [a.clone()]);

        restored.set_current_file(Some(b.as_str())).await.unwrap();
        assert_eq!(restored.files().files_to_show(), vec![b, a]);
    }

    #[tokio::test]
    async fn test_restore_without_state() {
        let mut fx = Fixture::new(ScriptedTransport::new());
        assert!(!fx.session.restore().await.unwrap());
        assert_eq!(
            fx.sink.messages(),
            vec![
                SinkMessage::FilesUpdated { files: Vec::new() },
                SinkMessage::History {
                    history: Vec::new()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_save_caps_project_files() {
        let mut fx = Fixture::new(ScriptedTransport::new());
        let paths: Vec<String> = (0..55).map(|i| fx.missing_file(&format!("{i}.rs"))).collect();
        fx.session.add_files(&paths).await.unwrap();

        let saved = fx.saved().await;
        assert_eq!(saved.project_files.len(), 50);
        assert_eq!(saved.project_files[0], paths[5]);
        // In-memory list is not capped
        assert_eq!(fx.session.files().project_files().len(), 55);
    }

    #[tokio::test]
    async fn test_update_ui_state_persists() {
        let mut fx = Fixture::new(ScriptedTransport::new());
        fx.session
            .update_ui_state(UiStatePatch {
                input_height: Some(64.0),
                is_reasoning_expanded: Some(true),
                ..UiStatePatch::default()
            })
            .await
            .unwrap();

        let saved = fx.saved().await;
        assert!(saved.is_reasoning_expanded);
        assert_eq!(saved.input_height, Some(64.0));
        assert_eq!(saved.chat_height, None);
    }
}
