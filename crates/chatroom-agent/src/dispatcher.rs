//! LLM Dispatcher: context assembly, streaming, tool-call interpretation,
//! mention chaining, interrupt/cancellation. Pairs a `pending_tasks` bag
//! (bulk teardown on shutdown) with a keyed `active_llm_tasks` map (point
//! lookup for interrupt) — the same two-structure split used wherever code
//! needs both "cancel everything" and "cancel the one thing for this key."

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chatroom_core::types::{LlmId, MessageId, ParticipantKind, RoomId};
use chatroom_protocol::ServerEvent;
use chatroom_provider::{ChatMessage, ChatProviderClient, ChatRequest};
use chatroom_registry::Registry;
use chatroom_store::types::{LlmConfiguration, Poll, Room};
use chatroom_store::Store;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::mention::{match_llm_from_name, match_llms_from_mentions, strip_self_name_prefix};
use crate::prompt::{append_poll_section, build_system_prompt};
use crate::tools::{build_poll_tools, build_room_tools};

/// Recommended `max_tokens` values.
const GENERAL_MAX_TOKENS: u32 = 1500;
const POLL_MAX_TOKENS: u32 = 500;

/// Single current task per LLM, recorded for `interrupt` lookup. A new call
/// beginning while one is outstanding overwrites this entry without
/// cancelling the prior task — latest observer wins; the overwritten task
/// keeps running to completion unsupervised.
struct ActiveCall {
    call_id: u64,
    token: CancellationToken,
    message_id: MessageId,
}

pub struct Dispatcher {
    store: Arc<Store>,
    registry: Arc<Registry>,
    provider: Arc<dyn ChatProviderClient>,
    active_llm_tasks: DashMap<(RoomId, LlmId), ActiveCall>,
    pending_tasks: DashMap<u64, JoinHandle<()>>,
    next_call_id: AtomicU64,
    root_token: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        store: Arc<Store>,
        registry: Arc<Registry>,
        provider: Arc<dyn ChatProviderClient>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            registry,
            provider,
            active_llm_tasks: DashMap::new(),
            pending_tasks: DashMap::new(),
            next_call_id: AtomicU64::new(0),
            root_token: CancellationToken::new(),
        })
    }

    /// Parse mentions in `content`, spawn one call per matched LLM.
    #[instrument(skip(self, content, client_mentions, room))]
    pub async fn dispatch_mentions(
        self: &Arc<Self>,
        room_id: &RoomId,
        content: &str,
        client_mentions: &[String],
        trigger_msg_id: MessageId,
        room: &Room,
    ) -> Vec<LlmId> {
        let matched: Vec<LlmConfiguration> = match_llms_from_mentions(content, client_mentions, &room.llms)
            .into_iter()
            .cloned()
            .collect();
        let spawned: Vec<LlmId> = matched.iter().map(|llm| llm.id.clone()).collect();
        for llm in matched {
            self.spawn_general_call(room_id.clone(), llm, trigger_msg_id.clone());
        }
        spawned
    }

    /// Same as `dispatch_mentions`, but resolving mention *names* (as
    /// produced by an LLM's `mention` tool call or its text output) with
    /// `source_llm_id` excluded to prevent self-re-invocation.
    #[instrument(skip(self, mentions, room))]
    pub async fn dispatch_llm_mentions(
        self: &Arc<Self>,
        room_id: &RoomId,
        room: &Room,
        mentions: &[String],
        trigger_msg_id: MessageId,
        source_llm_id: &LlmId,
    ) {
        for mention in mentions {
            if let Some(llm) = match_llm_from_name(mention, &room.llms, Some(source_llm_id)) {
                info!(from = %source_llm_id, to = %llm.id, "llm-to-llm mention");
                self.spawn_general_call(room_id.clone(), llm.clone(), trigger_msg_id.clone());
            }
        }
    }

    /// Spawn one poll-voting call per LLM in the room.
    #[instrument(skip(self))]
    pub async fn dispatch_poll_voting(
        self: &Arc<Self>,
        room_id: &RoomId,
        poll_id: &chatroom_core::types::PollId,
        trigger_msg_id: MessageId,
    ) -> Vec<LlmId> {
        let Some(room) = self.store.get_room(room_id).await else {
            return Vec::new();
        };
        if room.llms.is_empty() {
            return Vec::new();
        }
        let spawned: Vec<LlmId> = room.llms.iter().map(|llm| llm.id.clone()).collect();
        for llm in room.llms.clone() {
            self.spawn_poll_call(room_id.clone(), llm, poll_id.clone(), trigger_msg_id.clone());
        }
        spawned
    }

    /// Cancel the task recorded for `llm_id` in `room_id`, await its
    /// completion, then broadcast the terminal `llm_done` (the task itself
    /// does not emit one when cancelled).
    #[instrument(skip(self))]
    pub async fn cancel_llm_task(&self, room_id: &RoomId, llm_id: &LlmId) -> bool {
        let Some((_, active)) = self.active_llm_tasks.remove(&(room_id.clone(), llm_id.clone())) else {
            return false;
        };
        active.token.cancel();
        if let Some((_, handle)) = self.pending_tasks.remove(&active.call_id) {
            let _ = handle.await;
        }
        self.registry
            .broadcast(
                room_id,
                ServerEvent::LlmDone {
                    message_id: Some(active.message_id.to_string()),
                    llm_id: llm_id.to_string(),
                    reply_to: None,
                },
            )
            .await;
        true
    }

    /// Cancels every in-flight call and awaits completion with errors
    /// suppressed, for use during process shutdown.
    pub async fn shutdown(&self) {
        self.root_token.cancel();
        let handles: Vec<JoinHandle<()>> = self
            .pending_tasks
            .iter()
            .map(|e| e.key().clone())
            .collect::<Vec<_>>()
            .into_iter()
            .filter_map(|id| self.pending_tasks.remove(&id).map(|(_, h)| h))
            .collect();
        for handle in handles {
            let _ = handle.await;
        }
    }

    fn spawn_general_call(self: &Arc<Self>, room_id: RoomId, llm: LlmConfiguration, trigger_msg_id: MessageId) {
        let call_id = self.next_call_id.fetch_add(1, Ordering::Relaxed);
        let token = self.root_token.child_token();
        let message_id = MessageId::new();
        let key = (room_id.clone(), llm.id.clone());
        self.active_llm_tasks.insert(
            key.clone(),
            ActiveCall {
                call_id,
                token: token.clone(),
                message_id: message_id.clone(),
            },
        );

        let dispatcher = self.clone();
        let handle = tokio::spawn(async move {
            run_general_call(
                dispatcher.clone(),
                room_id,
                llm,
                trigger_msg_id,
                message_id,
                token,
            )
            .await;
            dispatcher.active_llm_tasks.remove_if(&key, |_, v| v.call_id == call_id);
            dispatcher.pending_tasks.remove(&call_id);
        });
        self.pending_tasks.insert(call_id, handle);
    }

    fn spawn_poll_call(
        self: &Arc<Self>,
        room_id: RoomId,
        llm: LlmConfiguration,
        poll_id: chatroom_core::types::PollId,
        trigger_msg_id: MessageId,
    ) {
        let call_id = self.next_call_id.fetch_add(1, Ordering::Relaxed);
        let token = self.root_token.child_token();
        let message_id = MessageId::new();
        let key = (room_id.clone(), llm.id.clone());
        self.active_llm_tasks.insert(
            key.clone(),
            ActiveCall {
                call_id,
                token: token.clone(),
                message_id: message_id.clone(),
            },
        );

        let dispatcher = self.clone();
        let handle = tokio::spawn(async move {
            run_poll_call(
                dispatcher.clone(),
                room_id,
                llm,
                poll_id,
                trigger_msg_id,
                message_id,
                token,
            )
            .await;
            dispatcher.active_llm_tasks.remove_if(&key, |_, v| v.call_id == call_id);
            dispatcher.pending_tasks.remove(&call_id);
        });
        self.pending_tasks.insert(call_id, handle);
    }
}

fn history_to_chat_messages(
    system_prompt: String,
    history: &[chatroom_store::types::Message],
    llm_id: &LlmId,
) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage {
        role: "system".into(),
        content: system_prompt,
    }];
    for m in history {
        if m.sender_type == ParticipantKind::Llm && m.sender_id == llm_id.as_str() {
            messages.push(ChatMessage {
                role: "assistant".into(),
                content: m.content.clone(),
            });
        } else {
            messages.push(ChatMessage {
                role: "user".into(),
                content: format!("{}: {}", m.sender_name, m.content),
            });
        }
    }
    messages
}

/// Outcome of draining a streamed call, shared between the general and
/// poll-voting call bodies.
struct StreamOutcome {
    accumulated: String,
    opted_out: bool,
    cancelled: bool,
    provider_error: Option<String>,
    pending_mentions: Vec<String>,
    voted: bool,
}

#[allow(clippy::too_many_arguments)]
async fn drain_stream(
    store: &Store,
    registry: &Registry,
    provider: &dyn ChatProviderClient,
    room_id: &RoomId,
    llm: &LlmConfiguration,
    message_id: &MessageId,
    reply_to: &MessageId,
    req: ChatRequest,
    cancel: &CancellationToken,
    collect_mentions: bool,
) -> StreamOutcome {
    let (tx, mut rx) = mpsc::channel(64);
    let provider_call = async {
        // SAFETY-free: `provider` outlives this future, called by reference.
        let _ = provider.stream_chat(&req, tx).await;
    };
    tokio::pin!(provider_call);

    let mut outcome = StreamOutcome {
        accumulated: String::new(),
        opted_out: false,
        cancelled: false,
        provider_error: None,
        pending_mentions: Vec::new(),
        voted: false,
    };
    let mut fired_tool_ids: HashSet<String> = HashSet::new();
    let mut driver_done = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                outcome.cancelled = true;
                break;
            }
            _ = &mut provider_call, if !driver_done => {
                driver_done = true;
            }
            maybe = rx.recv() => {
                match maybe {
                    None => break,
                    Some(Err(e)) => {
                        outcome.provider_error = Some(e.to_string());
                        break;
                    }
                    Some(Ok(delta)) => {
                        if delta.opted_out {
                            outcome.opted_out = true;
                            break;
                        }
                        for tc in &delta.tool_calls {
                            if !fired_tool_ids.insert(tc.id.clone()) {
                                continue;
                            }
                            match tc.name.as_str() {
                                "opt_out" => outcome.opted_out = true,
                                "mention" if collect_mentions => {
                                    if let Ok(args) = serde_json::from_str::<serde_json::Value>(&tc.arguments) {
                                        if let Some(p) = args.get("participant").and_then(|v| v.as_str()) {
                                            outcome.pending_mentions.push(p.to_string());
                                        }
                                    }
                                }
                                "vote_on_poll" => {
                                    if handle_vote_tool_call(store, registry, room_id, llm, &tc.arguments).await {
                                        outcome.voted = true;
                                    }
                                }
                                _ => {}
                            }
                        }
                        if outcome.opted_out {
                            break;
                        }
                        if let Some(content) = delta.content.as_deref() {
                            if !content.is_empty() {
                                outcome.accumulated.push_str(content);
                                registry
                                    .broadcast(
                                        room_id,
                                        ServerEvent::LlmChunk {
                                            message_id: message_id.to_string(),
                                            llm_id: llm.id.to_string(),
                                            content: content.to_string(),
                                            reply_to: Some(reply_to.to_string()),
                                        },
                                    )
                                    .await;
                            }
                        }
                    }
                }
            }
        }
    }

    outcome
}

async fn handle_vote_tool_call(
    store: &Store,
    registry: &Registry,
    room_id: &RoomId,
    llm: &LlmConfiguration,
    arguments: &str,
) -> bool {
    let Ok(args) = serde_json::from_str::<serde_json::Value>(arguments) else {
        warn!(llm_id = %llm.id, "invalid vote_on_poll arguments");
        return false;
    };
    let Some(poll_id) = args.get("poll_id").and_then(|v| v.as_str()) else {
        return false;
    };
    let Some(option_ids) = args.get("option_ids").and_then(|v| v.as_array()) else {
        return false;
    };
    let reason = args
        .get("reason")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let poll_id = chatroom_core::types::PollId::from(poll_id.to_string());
    let mut voted = false;
    for option_id in option_ids.iter().filter_map(|v| v.as_str()) {
        let option_id = chatroom_core::types::OptionId::from(option_id.to_string());
        match store
            .add_vote(
                room_id,
                &poll_id,
                &option_id,
                llm.id.as_str().to_string(),
                llm.display_name.clone(),
                reason.clone(),
            )
            .await
        {
            Ok(Some((poll, option, vote))) => {
                voted = true;
                registry
                    .broadcast(
                        room_id,
                        ServerEvent::PollVoted {
                            poll_id: poll.poll_id.to_string(),
                            option_id: option.id.to_string(),
                            voter_id: vote.voter_id.clone(),
                            voter_name: vote.voter_name.clone(),
                        },
                    )
                    .await;
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "add_vote failed"),
        }
    }
    voted
}

async fn run_general_call(
    dispatcher: Arc<Dispatcher>,
    room_id: RoomId,
    llm: LlmConfiguration,
    trigger_msg_id: MessageId,
    message_id: MessageId,
    cancel: CancellationToken,
) {
    let store = &dispatcher.store;
    let registry = &dispatcher.registry;

    let Some(room) = store.get_room(&room_id).await else {
        return;
    };

    registry
        .broadcast(
            &room_id,
            ServerEvent::LlmThinking {
                llm_id: llm.id.to_string(),
                reply_to: Some(trigger_msg_id.to_string()),
            },
        )
        .await;

    let history = store
        .load_history(&room_id, 50, None)
        .await
        .map(|p| p.messages)
        .unwrap_or_default();
    let online_ids = registry.get_online_user_ids(&room_id);
    let participants = store.get_participants(&room_id).await.unwrap_or_default();
    let online_humans: Vec<String> = participants
        .iter()
        .filter(|p| online_ids.contains(&p.user_id))
        .map(|p| p.display_name.clone())
        .collect();

    let system_prompt = build_system_prompt(&llm, &room, &online_humans);
    let chat_messages = history_to_chat_messages(system_prompt, &history, &llm.id);

    let active_polls = store.list_room_polls(&room_id, true).await.unwrap_or_default();
    let llm_names: Vec<String> = room.llms.iter().map(|l| l.display_name.clone()).collect();
    let tools = build_room_tools(&llm_names, &active_polls);

    let req = ChatRequest {
        messages: chat_messages,
        models: vec![llm.model.clone()],
        tools,
        max_tokens: Some(GENERAL_MAX_TOKENS),
        response_format: None,
    };

    let outcome = drain_stream(
        store,
        registry,
        dispatcher.provider.as_ref(),
        &room_id,
        &llm,
        &message_id,
        &trigger_msg_id,
        req,
        &cancel,
        true,
    )
    .await;

    if outcome.cancelled {
        // Caller of cancel_llm_task broadcasts the terminal llm_done.
        return;
    }

    if let Some(detail) = outcome.provider_error {
        registry
            .broadcast(
                &room_id,
                ServerEvent::Error {
                    code: "LLM_ERROR".into(),
                    message: format!("Error from {}: {detail}", llm.display_name),
                },
            )
            .await;
        return;
    }

    if outcome.opted_out {
        registry
            .broadcast(
                &room_id,
                ServerEvent::LlmDone {
                    message_id: Some(message_id.to_string()),
                    llm_id: llm.id.to_string(),
                    reply_to: Some(trigger_msg_id.to_string()),
                },
            )
            .await;
        return;
    }

    let final_content = strip_self_name_prefix(&outcome.accumulated, &llm.display_name);
    if final_content.trim().is_empty() {
        registry
            .broadcast(
                &room_id,
                ServerEvent::LlmDone {
                    message_id: None,
                    llm_id: llm.id.to_string(),
                    reply_to: Some(trigger_msg_id.to_string()),
                },
            )
            .await;
        return;
    }

    let stored = match store
        .add_message(
            &room_id,
            llm.id.as_str().to_string(),
            llm.display_name.clone(),
            ParticipantKind::Llm,
            final_content.clone(),
            Some(trigger_msg_id.clone()),
            None,
            Some(message_id.clone()),
        )
        .await
    {
        Ok(msg) => msg,
        Err(e) => {
            warn!(error = %e, "failed to store llm message");
            return;
        }
    };

    registry
        .broadcast(
            &room_id,
            ServerEvent::LlmDone {
                message_id: Some(stored.message_id.to_string()),
                llm_id: llm.id.to_string(),
                reply_to: Some(trigger_msg_id.to_string()),
            },
        )
        .await;

    // Merge tool-sourced mentions with a text scan of the stored content
    // (fallback for models that @mention in prose instead of via tool call).
    let mut merged_mentions = outcome.pending_mentions.clone();
    let lowered: HashSet<String> = merged_mentions.iter().map(|m| m.to_lowercase()).collect();
    for cap in crate::mention::text_mentions(&final_content) {
        if !lowered.contains(&cap.to_lowercase()) {
            merged_mentions.push(cap);
        }
    }

    if !merged_mentions.is_empty() {
        dispatcher
            .dispatch_llm_mentions(&room_id, &room, &merged_mentions, stored.message_id, &llm.id)
            .await;
    }
}

async fn run_poll_call(
    dispatcher: Arc<Dispatcher>,
    room_id: RoomId,
    llm: LlmConfiguration,
    poll_id: chatroom_core::types::PollId,
    trigger_msg_id: MessageId,
    message_id: MessageId,
    cancel: CancellationToken,
) {
    let store = &dispatcher.store;
    let registry = &dispatcher.registry;

    let Some(room) = store.get_room(&room_id).await else {
        return;
    };
    let Ok(poll) = store.get_poll(&room_id, &poll_id).await else {
        return;
    };

    registry
        .broadcast(
            &room_id,
            ServerEvent::LlmThinking {
                llm_id: llm.id.to_string(),
                reply_to: Some(trigger_msg_id.to_string()),
            },
        )
        .await;

    let history = store
        .load_history(&room_id, 50, None)
        .await
        .map(|p| p.messages)
        .unwrap_or_default();
    let online_ids = registry.get_online_user_ids(&room_id);
    let participants = store.get_participants(&room_id).await.unwrap_or_default();
    let online_humans: Vec<String> = participants
        .iter()
        .filter(|p| online_ids.contains(&p.user_id))
        .map(|p| p.display_name.clone())
        .collect();

    let base_prompt = build_system_prompt(&llm, &room, &online_humans);
    let system_prompt = append_poll_section(base_prompt, &poll, poll.mandatory);
    let chat_messages = history_to_chat_messages(system_prompt, &history, &llm.id);

    let tools = build_poll_tools(&poll, poll.mandatory);
    let req = ChatRequest {
        messages: chat_messages,
        models: vec![llm.model.clone()],
        tools,
        max_tokens: Some(POLL_MAX_TOKENS),
        response_format: None,
    };

    let outcome = drain_stream(
        store,
        registry,
        dispatcher.provider.as_ref(),
        &room_id,
        &llm,
        &message_id,
        &trigger_msg_id,
        req,
        &cancel,
        false,
    )
    .await;

    if outcome.cancelled {
        return;
    }

    if let Some(detail) = outcome.provider_error {
        registry
            .broadcast(
                &room_id,
                ServerEvent::Error {
                    code: "LLM_ERROR".into(),
                    message: format!("Error from {}: {detail}", llm.display_name),
                },
            )
            .await;
        return;
    }

    if outcome.opted_out {
        info!(llm_id = %llm.id, poll_id = %poll_id, "llm opted out of poll voting");
    }

    let final_content = strip_self_name_prefix(&outcome.accumulated, &llm.display_name);
    let stored_id = if !final_content.trim().is_empty() {
        match store
            .add_message(
                &room_id,
                llm.id.as_str().to_string(),
                llm.display_name.clone(),
                ParticipantKind::Llm,
                final_content,
                Some(trigger_msg_id.clone()),
                None,
                Some(message_id.clone()),
            )
            .await
        {
            Ok(msg) => Some(msg.message_id),
            Err(_) => None,
        }
    } else {
        None
    };

    registry
        .broadcast(
            &room_id,
            ServerEvent::LlmDone {
                message_id: stored_id.map(|id| id.to_string()),
                llm_id: llm.id.to_string(),
                reply_to: Some(trigger_msg_id.to_string()),
            },
        )
        .await;

    if poll.mandatory && !outcome.voted {
        warn!(llm_id = %llm.id, poll_id = %poll_id, "llm did not vote on mandatory poll");
    } else {
        info!(llm_id = %llm.id, poll_id = %poll_id, voted = outcome.voted, "llm poll response");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatroom_core::types::HandlerId;
    use chatroom_core::types::UserId;
    use chatroom_provider::mock::MockChatProviderClient;
    use chatroom_provider::{ProviderDelta, ProviderError, ToolCallDelta};
    use chatroom_store::types::{ChatStyle, PollOptionSeed, Visibility};
    use std::time::Duration;
    use tokio::time::timeout;

    fn llm_config(id: &str, display_name: &str) -> LlmConfiguration {
        LlmConfiguration {
            id: LlmId::from(id),
            model: format!("{id}-model"),
            persona_prompt: "You are helpful.".into(),
            display_name: display_name.into(),
            title: None,
            chat_style: ChatStyle::Default,
            avatar: None,
        }
    }

    async fn watch(registry: &Registry, room_id: &RoomId) -> mpsc::Receiver<ServerEvent> {
        let (tx, rx) = mpsc::channel(32);
        registry.register(room_id, HandlerId::new(), UserId::from("watcher"), tx);
        rx
    }

    async fn recv_until(
        rx: &mut mpsc::Receiver<ServerEvent>,
        pred: impl Fn(&ServerEvent) -> bool,
    ) -> ServerEvent {
        timeout(Duration::from_secs(2), async {
            loop {
                let event = rx.recv().await.expect("channel closed before match");
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for expected event")
    }

    #[tokio::test]
    async fn general_call_streams_chunks_then_done_and_stores_message() {
        let store = Arc::new(Store::new());
        let registry = Arc::new(Registry::new());
        let provider: Arc<dyn ChatProviderClient> = Arc::new(MockChatProviderClient::new(vec![
            MockChatProviderClient::text("claude-model", "Hello "),
            MockChatProviderClient::text("claude-model", "there."),
        ]));

        let claude = llm_config("claude", "Claude");
        let room_id = store
            .create_room(
                "room".into(),
                UserId::from("alice"),
                vec![claude.clone()],
                "".into(),
                Visibility::Public,
            )
            .unwrap();
        let room = store.get_room(&room_id).await.unwrap();

        let dispatcher = Dispatcher::new(store.clone(), registry.clone(), provider);
        let mut rx = watch(&registry, &room_id).await;

        let trigger = store
            .add_message(
                &room_id,
                "alice".into(),
                "Alice".into(),
                ParticipantKind::Human,
                "@Claude hi".into(),
                None,
                None,
                None,
            )
            .await
            .unwrap();

        dispatcher
            .dispatch_mentions(&room_id, "@Claude hi", &[], trigger.message_id.clone(), &room)
            .await;

        recv_until(&mut rx, |e| matches!(e, ServerEvent::LlmThinking { .. })).await;
        let done = recv_until(&mut rx, |e| matches!(e, ServerEvent::LlmDone { .. })).await;
        let ServerEvent::LlmDone { message_id, .. } = done else {
            unreachable!()
        };
        let message_id = message_id.expect("non-empty reply must be stored");

        let history = store.load_history(&room_id, 10, None).await.unwrap();
        assert_eq!(history.messages.len(), 2);
        let stored = &history.messages[1];
        assert_eq!(stored.message_id.to_string(), message_id);
        assert_eq!(stored.content, "Hello there.");
        assert_eq!(stored.sender_id, "claude");
    }

    #[tokio::test]
    async fn at_all_fans_out_to_every_llm_with_interleaved_chunks() {
        let store = Arc::new(Store::new());
        let registry = Arc::new(Registry::new());

        let mut scripts = std::collections::HashMap::new();
        scripts.insert(
            "claude-model".to_string(),
            vec![MockChatProviderClient::text("claude-model", "Claude's summary.")],
        );
        scripts.insert(
            "gemini-model".to_string(),
            vec![MockChatProviderClient::text("gemini-model", "Gemini's summary.")],
        );
        let provider: Arc<dyn ChatProviderClient> = Arc::new(MockChatProviderClient::keyed(scripts));

        let claude = llm_config("claude", "Claude");
        let gemini = llm_config("gemini", "Gemini");
        let room_id = store
            .create_room(
                "room".into(),
                UserId::from("alice"),
                vec![claude.clone(), gemini.clone()],
                "".into(),
                Visibility::Public,
            )
            .unwrap();
        let room = store.get_room(&room_id).await.unwrap();

        let dispatcher = Dispatcher::new(store.clone(), registry.clone(), provider);
        let mut rx = watch(&registry, &room_id).await;

        let trigger = store
            .add_message(
                &room_id,
                "alice".into(),
                "Alice".into(),
                ParticipantKind::Human,
                "@everyone please summarize".into(),
                None,
                None,
                None,
            )
            .await
            .unwrap();

        let spawned = dispatcher
            .dispatch_mentions(
                &room_id,
                "@everyone please summarize",
                &[],
                trigger.message_id.clone(),
                &room,
            )
            .await;
        assert_eq!(spawned.len(), 2, "@everyone must fan out to both llms");

        let mut thinking_seen = HashSet::new();
        while thinking_seen.len() < 2 {
            if let ServerEvent::LlmThinking { llm_id, .. } =
                recv_until(&mut rx, |e| matches!(e, ServerEvent::LlmThinking { .. })).await
            {
                thinking_seen.insert(llm_id);
            }
        }
        assert!(thinking_seen.contains("claude"));
        assert!(thinking_seen.contains("gemini"));

        let mut done_seen = HashSet::new();
        while done_seen.len() < 2 {
            if let ServerEvent::LlmDone { llm_id, .. } =
                recv_until(&mut rx, |e| matches!(e, ServerEvent::LlmDone { .. })).await
            {
                done_seen.insert(llm_id);
            }
        }
        assert!(done_seen.contains("claude"));
        assert!(done_seen.contains("gemini"));

        let history = store.load_history(&room_id, 10, None).await.unwrap();
        // trigger + two assistant replies.
        assert_eq!(history.messages.len(), 3);
    }

    #[tokio::test]
    async fn mention_tool_call_chains_to_another_llm() {
        let store = Arc::new(Store::new());
        let registry = Arc::new(Registry::new());
        let provider: Arc<dyn ChatProviderClient> = Arc::new(MockChatProviderClient::new(vec![
            Ok(ProviderDelta {
                model: "claude-model".into(),
                content: Some("Let me bring in Gemini. ".into()),
                tool_calls: vec![ToolCallDelta {
                    id: "tc1".into(),
                    name: "mention".into(),
                    arguments: serde_json::json!({"participant": "Gemini"}).to_string(),
                }],
                ..Default::default()
            }),
        ]));

        let claude = llm_config("claude", "Claude");
        let gemini = llm_config("gemini", "Gemini");
        let room_id = store
            .create_room(
                "room".into(),
                UserId::from("alice"),
                vec![claude.clone(), gemini.clone()],
                "".into(),
                Visibility::Public,
            )
            .unwrap();
        let room = store.get_room(&room_id).await.unwrap();

        let dispatcher = Dispatcher::new(store.clone(), registry.clone(), provider);
        let mut rx = watch(&registry, &room_id).await;

        let trigger = store
            .add_message(
                &room_id,
                "alice".into(),
                "Alice".into(),
                ParticipantKind::Human,
                "@Claude loop in the team".into(),
                None,
                None,
                None,
            )
            .await
            .unwrap();

        dispatcher
            .dispatch_mentions(
                &room_id,
                "@Claude loop in the team",
                &[],
                trigger.message_id.clone(),
                &room,
            )
            .await;

        let gemini_thinking = recv_until(&mut rx, |e| {
            matches!(e, ServerEvent::LlmThinking { llm_id, .. } if llm_id == "gemini")
        })
        .await;
        let ServerEvent::LlmThinking { reply_to, .. } = gemini_thinking else {
            unreachable!()
        };
        assert!(reply_to.is_some(), "chained call must reference claude's stored message");
    }

    #[tokio::test]
    async fn cancel_llm_task_broadcasts_terminal_done_without_self_emission() {
        struct HangingProvider;

        #[async_trait::async_trait]
        impl ChatProviderClient for HangingProvider {
            async fn stream_chat(
                &self,
                _req: &ChatRequest,
                tx: mpsc::Sender<Result<ProviderDelta, ProviderError>>,
            ) -> Result<(), ProviderError> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                drop(tx);
                Ok(())
            }
        }

        let store = Arc::new(Store::new());
        let registry = Arc::new(Registry::new());
        let provider: Arc<dyn ChatProviderClient> = Arc::new(HangingProvider);

        let claude = llm_config("claude", "Claude");
        let room_id = store
            .create_room(
                "room".into(),
                UserId::from("alice"),
                vec![claude.clone()],
                "".into(),
                Visibility::Public,
            )
            .unwrap();
        let room = store.get_room(&room_id).await.unwrap();

        let dispatcher = Dispatcher::new(store.clone(), registry.clone(), provider);
        let mut rx = watch(&registry, &room_id).await;

        let trigger_id = MessageId::new();
        dispatcher
            .dispatch_mentions(&room_id, "@Claude hi", &[], trigger_id, &room)
            .await;

        recv_until(&mut rx, |e| matches!(e, ServerEvent::LlmThinking { .. })).await;

        let cancelled = dispatcher.cancel_llm_task(&room_id, &LlmId::from("claude")).await;
        assert!(cancelled);

        let done = recv_until(&mut rx, |e| matches!(e, ServerEvent::LlmDone { .. })).await;
        assert!(matches!(done, ServerEvent::LlmDone { reply_to: None, .. }));

        let history = store.load_history(&room_id, 10, None).await.unwrap();
        assert!(history.messages.is_empty(), "cancelled call must not store a message");

        let again = dispatcher.cancel_llm_task(&room_id, &LlmId::from("claude")).await;
        assert!(!again, "no active task left to cancel");
    }

    #[tokio::test]
    async fn poll_voting_dispatch_casts_a_vote_and_broadcasts_it() {
        let store = Arc::new(Store::new());
        let registry = Arc::new(Registry::new());
        let claude = llm_config("claude", "Claude");
        let room_id = store
            .create_room(
                "room".into(),
                UserId::from("alice"),
                vec![claude.clone()],
                "".into(),
                Visibility::Public,
            )
            .unwrap();
        let poll = store
            .create_poll(
                &room_id,
                "alice".into(),
                "Alice".into(),
                ParticipantKind::Human,
                "Pizza or sushi?".into(),
                vec![
                    PollOptionSeed {
                        text: "Pizza".into(),
                        description: None,
                    },
                    PollOptionSeed {
                        text: "Sushi".into(),
                        description: None,
                    },
                ],
                false,
                false,
                true,
            )
            .await
            .unwrap();
        let option_id = poll.options[0].id.clone();

        let provider: Arc<dyn ChatProviderClient> = Arc::new(MockChatProviderClient::new(vec![
            Ok(ProviderDelta {
                model: "claude-model".into(),
                content: Some("Going with pizza.".into()),
                tool_calls: vec![ToolCallDelta {
                    id: "tc1".into(),
                    name: "vote_on_poll".into(),
                    arguments: serde_json::json!({
                        "poll_id": poll.poll_id.to_string(),
                        "option_ids": [option_id.to_string()],
                        "reason": "it's faster",
                    })
                    .to_string(),
                }],
                ..Default::default()
            }),
        ]));

        let dispatcher = Dispatcher::new(store.clone(), registry.clone(), provider);
        let mut rx = watch(&registry, &room_id).await;

        dispatcher
            .dispatch_poll_voting(&room_id, &poll.poll_id, MessageId::new())
            .await;

        recv_until(&mut rx, |e| matches!(e, ServerEvent::PollVoted { .. })).await;

        let refreshed = store.get_poll(&room_id, &poll.poll_id).await.unwrap();
        assert_eq!(refreshed.options[0].votes.len(), 1);
        assert_eq!(refreshed.options[0].votes[0].voter_id, "claude");
    }
}
