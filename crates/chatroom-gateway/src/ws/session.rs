//! `RoomSession` — the Session Handler itself: one bidirectional stream's
//! worth of state and the frame handlers for the eleven inbound tags.
//! `connection.rs` owns the socket; this module owns the protocol.

use std::collections::HashSet;
use std::sync::Arc;

use chatroom_core::types::{
    HandlerId, LlmId, MessageId, OptionId, ParticipantKind, PollId, RoomId, UserId,
};
use chatroom_protocol::frames::{ClientFrame, InboundFrame, PollOptionInput};
use chatroom_protocol::ServerEvent;
use chatroom_store::types::{LlmConfiguration, LlmPatch, ParticipantRole, PollOptionSeed};
use tokio::sync::mpsc;
use tracing::warn;

use crate::app::AppState;
use crate::convert;

/// Bound to `(room_id, user_id, display_name, role)` on the first `join`
/// frame; `None` until then. `join` must be the first frame on a connection.
struct Identity {
    room_id: RoomId,
    user_id: UserId,
    display_name: String,
}

pub struct RoomSession {
    handler_id: HandlerId,
    state: Arc<AppState>,
    outbound: mpsc::Sender<ServerEvent>,
    identity: Option<Identity>,
    /// LLM ids this handler has triggered a call for, so disconnect can
    /// cancel anything still running that it originated.
    triggered_llms: HashSet<LlmId>,
}

impl RoomSession {
    pub fn new(handler_id: HandlerId, state: Arc<AppState>, outbound: mpsc::Sender<ServerEvent>) -> Self {
        Self {
            handler_id,
            state,
            outbound,
            identity: None,
            triggered_llms: HashSet::new(),
        }
    }

    pub async fn handle_text(&mut self, text: &str) {
        let inbound: InboundFrame = match serde_json::from_str(text) {
            Ok(f) => f,
            Err(e) => {
                warn!(handler_id = %self.handler_id, error = %e, "malformed frame, ignoring");
                return;
            }
        };
        let Some(frame) = inbound.as_client_frame() else {
            // unknown tag or shape mismatch — ignored per spec §4.3.
            return;
        };
        self.handle_frame(frame).await;
    }

    async fn handle_frame(&mut self, frame: ClientFrame) {
        match frame {
            ClientFrame::Join {
                room_id,
                user_id,
                display_name,
                role,
                title,
                avatar,
            } => self.on_join(room_id, user_id, display_name, role, title, avatar).await,
            ClientFrame::Message {
                content,
                mentions,
                reply_to,
            } => self.on_message(content, mentions, reply_to).await,
            ClientFrame::Typing => self.on_typing().await,
            ClientFrame::Interrupt { llm_id } => self.on_interrupt(llm_id).await,
            ClientFrame::AddLlm {
                id,
                model,
                persona_prompt,
                display_name,
                title,
                chat_style,
                avatar,
            } => {
                self.on_add_llm(id, model, persona_prompt, display_name, title, chat_style, avatar)
                    .await
            }
            ClientFrame::UpdateLlm {
                id,
                model,
                persona_prompt,
                display_name,
                title,
                chat_style,
                avatar,
            } => {
                self.on_update_llm(id, model, persona_prompt, display_name, title, chat_style, avatar)
                    .await
            }
            ClientFrame::RemoveLlm { id } => self.on_remove_llm(id).await,
            ClientFrame::UpdateRoomDescription { description } => {
                self.on_update_room_description(description).await
            }
            ClientFrame::CreatePoll {
                question,
                options,
                allow_multiple,
                anonymous,
                mandatory,
            } => {
                self.on_create_poll(question, options, allow_multiple, anonymous, mandatory)
                    .await
            }
            ClientFrame::CastVote {
                poll_id,
                option_ids,
                reason,
            } => self.on_cast_vote(poll_id, option_ids, reason).await,
            ClientFrame::ClosePoll { poll_id } => self.on_close_poll(poll_id).await,
            ClientFrame::Ping => {
                let _ = self.outbound.send(ServerEvent::Pong).await;
            }
        }
    }

    /// Send only to this handler's own connection.
    async fn send(&self, event: ServerEvent) {
        let _ = self.outbound.send(event).await;
    }

    fn room_id(&self) -> Option<&RoomId> {
        self.identity.as_ref().map(|i| &i.room_id)
    }

    async fn on_join(
        &mut self,
        room_id: String,
        user_id: String,
        display_name: String,
        role: Option<String>,
        title: Option<String>,
        avatar: Option<String>,
    ) {
        let room_id = RoomId::from(room_id);
        let Some(room) = self.state.store.get_room(&room_id).await else {
            self.send(ServerEvent::Error {
                code: "ROOM_NOT_FOUND".to_string(),
                message: format!("room not found: {room_id}"),
            })
            .await;
            return;
        };

        let user_id = UserId::from(user_id);
        let role = parse_role(role.as_deref());
        if let Err(e) = self
            .state
            .store
            .add_participant(&room_id, user_id.clone(), display_name.clone(), role, title, avatar)
            .await
        {
            self.send(ServerEvent::Error {
                code: e.code().to_string(),
                message: e.to_string(),
            })
            .await;
            return;
        }

        self.state
            .registry
            .register(&room_id, self.handler_id.clone(), user_id.clone(), self.outbound.clone());

        self.identity = Some(Identity {
            room_id: room_id.clone(),
            user_id: user_id.clone(),
            display_name: display_name.clone(),
        });

        let online_ids = self.state.registry.get_online_user_ids(&room_id);
        let participants = self
            .state
            .store
            .get_participants(&room_id)
            .await
            .unwrap_or_default();
        let history_limit = self.state.config.limits.history_page_size;
        let messages = self
            .state
            .store
            .load_history(&room_id, history_limit, None)
            .await
            .map(|p| p.messages)
            .unwrap_or_default();
        let polls = self
            .state
            .store
            .list_room_polls(&room_id, true)
            .await
            .unwrap_or_default();

        self.send(ServerEvent::RoomState {
            room: convert::room_info(&room),
            participants: participants
                .iter()
                .map(|p| convert::participant_info(p, &online_ids))
                .collect(),
            messages: messages.iter().map(convert::message_info).collect(),
            polls: polls.iter().map(convert::poll_info).collect(),
        })
        .await;

        self.state
            .registry
            .broadcast_except(
                &room_id,
                ServerEvent::UserJoined {
                    user_id: user_id.to_string(),
                    display_name,
                },
                &user_id,
            )
            .await;
    }

    async fn on_message(&mut self, content: String, client_mentions: Vec<String>, reply_to: Option<String>) {
        let Some(identity) = self.identity_ref() else {
            return;
        };
        let room_id = identity.room_id.clone();
        let user_id = identity.user_id.clone();
        let display_name = identity.display_name.clone();

        let reply_to_id = reply_to.map(MessageId::from);
        let message = match self
            .state
            .store
            .add_message(
                &room_id,
                user_id.to_string(),
                display_name,
                ParticipantKind::Human,
                content.clone(),
                reply_to_id,
                None,
                None,
            )
            .await
        {
            Ok(m) => m,
            Err(e) => {
                self.send(ServerEvent::Error {
                    code: e.code().to_string(),
                    message: e.to_string(),
                })
                .await;
                return;
            }
        };

        self.state
            .registry
            .broadcast(
                &room_id,
                ServerEvent::MessageReceived {
                    message: convert::message_info(&message),
                },
            )
            .await;

        let Some(room) = self.state.store.get_room(&room_id).await else {
            return;
        };
        let spawned = self
            .state
            .dispatcher
            .dispatch_mentions(&room_id, &content, &client_mentions, message.message_id.clone(), &room)
            .await;
        self.triggered_llms.extend(spawned);
    }

    async fn on_typing(&mut self) {
        let Some(identity) = self.identity_ref() else {
            return;
        };
        let room_id = identity.room_id.clone();
        let user_id = identity.user_id.clone();
        let display_name = identity.display_name.clone();
        self.state
            .registry
            .broadcast_except(
                &room_id,
                ServerEvent::UserTyping {
                    user_id: user_id.to_string(),
                    display_name,
                },
                &user_id,
            )
            .await;
    }

    async fn on_interrupt(&mut self, llm_id: String) {
        let Some(room_id) = self.room_id().cloned() else {
            return;
        };
        let llm_id = LlmId::from(llm_id);
        self.state.dispatcher.cancel_llm_task(&room_id, &llm_id).await;
    }

    #[allow(clippy::too_many_arguments)]
    async fn on_add_llm(
        &mut self,
        id: String,
        model: String,
        persona_prompt: String,
        display_name: String,
        title: Option<String>,
        chat_style: Option<String>,
        avatar: Option<String>,
    ) {
        let Some(room_id) = self.room_id().cloned() else {
            return;
        };
        let llm = LlmConfiguration {
            id: LlmId::from(id),
            model,
            persona_prompt,
            display_name,
            title,
            chat_style: parse_chat_style(chat_style.as_deref()),
            avatar,
        };
        match self.state.store.add_llm(&room_id, llm.clone()).await {
            Ok(()) => {
                self.state
                    .registry
                    .broadcast(&room_id, ServerEvent::LlmAdded { llm: convert::llm_info(&llm) })
                    .await;
            }
            Err(e) => {
                self.send(ServerEvent::Error {
                    code: e.code().to_string(),
                    message: e.to_string(),
                })
                .await;
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn on_update_llm(
        &mut self,
        id: String,
        model: Option<String>,
        persona_prompt: Option<String>,
        display_name: Option<String>,
        title: Option<String>,
        chat_style: Option<String>,
        avatar: Option<String>,
    ) {
        let Some(room_id) = self.room_id().cloned() else {
            return;
        };
        let llm_id = LlmId::from(id);
        let patch = LlmPatch {
            model,
            persona_prompt,
            display_name,
            title,
            chat_style: chat_style.map(|s| parse_chat_style(Some(&s))),
            avatar,
        };
        match self.state.store.update_llm(&room_id, &llm_id, patch).await {
            Ok(llm) => {
                self.state
                    .registry
                    .broadcast(&room_id, ServerEvent::LlmUpdated { llm: convert::llm_info(&llm) })
                    .await;
            }
            Err(e) => {
                self.send(ServerEvent::Error {
                    code: e.code().to_string(),
                    message: e.to_string(),
                })
                .await;
            }
        }
    }

    async fn on_remove_llm(&mut self, id: String) {
        let Some(room_id) = self.room_id().cloned() else {
            return;
        };
        let llm_id = LlmId::from(id);
        match self.state.store.remove_llm(&room_id, &llm_id).await {
            Ok(true) => {
                self.state
                    .registry
                    .broadcast(
                        &room_id,
                        ServerEvent::LlmRemoved {
                            llm_id: llm_id.to_string(),
                        },
                    )
                    .await;
            }
            Ok(false) => {}
            Err(e) => {
                self.send(ServerEvent::Error {
                    code: e.code().to_string(),
                    message: e.to_string(),
                })
                .await;
            }
        }
    }

    async fn on_update_room_description(&mut self, description: String) {
        let Some(room_id) = self.room_id().cloned() else {
            return;
        };
        match self.state.store.update_room_description(&room_id, description.clone()).await {
            Ok(_) => {
                self.state
                    .registry
                    .broadcast(&room_id, ServerEvent::RoomUpdated { description })
                    .await;
            }
            Err(e) => {
                self.send(ServerEvent::Error {
                    code: e.code().to_string(),
                    message: e.to_string(),
                })
                .await;
            }
        }
    }

    async fn on_create_poll(
        &mut self,
        question: String,
        options: Vec<PollOptionInput>,
        allow_multiple: bool,
        anonymous: bool,
        mandatory: bool,
    ) {
        let Some(identity) = self.identity_ref() else {
            return;
        };
        let room_id = identity.room_id.clone();
        let user_id = identity.user_id.clone();
        let display_name = identity.display_name.clone();

        let seeds: Vec<PollOptionSeed> = options
            .into_iter()
            .map(|o| PollOptionSeed {
                text: o.text,
                description: o.description,
            })
            .collect();

        let poll = match self
            .state
            .store
            .create_poll(
                &room_id,
                user_id.to_string(),
                display_name.clone(),
                ParticipantKind::Human,
                question.clone(),
                seeds,
                allow_multiple,
                anonymous,
                mandatory,
            )
            .await
        {
            Ok(p) => p,
            Err(e) => {
                self.send(ServerEvent::Error {
                    code: e.code().to_string(),
                    message: e.to_string(),
                })
                .await;
                return;
            }
        };

        let anchor = match self
            .state
            .store
            .add_message(
                &room_id,
                user_id.to_string(),
                display_name,
                ParticipantKind::Human,
                format!("started a poll: {question}"),
                None,
                Some(poll.poll_id.clone()),
                None,
            )
            .await
        {
            Ok(anchor) => anchor,
            Err(e) => {
                self.send(ServerEvent::Error {
                    code: e.code().to_string(),
                    message: e.to_string(),
                })
                .await;
                return;
            }
        };

        self.state
            .registry
            .broadcast(
                &room_id,
                ServerEvent::MessageReceived {
                    message: convert::message_info(&anchor),
                },
            )
            .await;

        self.state
            .registry
            .broadcast(&room_id, ServerEvent::PollCreated { poll: convert::poll_info(&poll) })
            .await;

        let spawned = self
            .state
            .dispatcher
            .dispatch_poll_voting(&room_id, &poll.poll_id, anchor.message_id)
            .await;
        self.triggered_llms.extend(spawned);
    }

    async fn on_cast_vote(&mut self, poll_id: String, option_ids: Vec<String>, reason: Option<String>) {
        let Some(identity) = self.identity_ref() else {
            return;
        };
        let room_id = identity.room_id.clone();
        let user_id = identity.user_id.clone();
        let display_name = identity.display_name.clone();
        let poll_id = PollId::from(poll_id);

        for option_id in option_ids {
            let option_id = OptionId::from(option_id);
            match self
                .state
                .store
                .add_vote(
                    &room_id,
                    &poll_id,
                    &option_id,
                    user_id.to_string(),
                    display_name.clone(),
                    reason.clone(),
                )
                .await
            {
                Ok(Some((_, option, vote))) => {
                    self.state
                        .registry
                        .broadcast(
                            &room_id,
                            ServerEvent::PollVoted {
                                poll_id: poll_id.to_string(),
                                option_id: option.id.to_string(),
                                voter_id: vote.voter_id,
                                voter_name: vote.voter_name,
                            },
                        )
                        .await;
                }
                Ok(None) => {}
                Err(e) => {
                    self.send(ServerEvent::Error {
                        code: e.code().to_string(),
                        message: e.to_string(),
                    })
                    .await;
                }
            }
        }
    }

    async fn on_close_poll(&mut self, poll_id: String) {
        let Some(room_id) = self.room_id().cloned() else {
            return;
        };
        let poll_id = PollId::from(poll_id);
        match self.state.store.close_poll(&room_id, &poll_id).await {
            Ok(_) => {
                self.state
                    .registry
                    .broadcast(
                        &room_id,
                        ServerEvent::PollClosed {
                            poll_id: poll_id.to_string(),
                        },
                    )
                    .await;
            }
            Err(e) => {
                self.send(ServerEvent::Error {
                    code: e.code().to_string(),
                    message: e.to_string(),
                })
                .await;
            }
        }
    }

    fn identity_ref(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Run when the reader/writer loop ends (spec §4.3):
    /// 1. Cancel any LLM tasks this handler originated.
    /// 2. Unregister from the Registry.
    /// 3. Broadcast `user_left` iff no other handler for `(room, user)`
    ///    remains online.
    pub async fn on_disconnect(&mut self) {
        let Some(identity) = self.identity.take() else {
            return;
        };
        for llm_id in self.triggered_llms.drain() {
            self.state.dispatcher.cancel_llm_task(&identity.room_id, &llm_id).await;
        }

        self.state.registry.unregister(&identity.room_id, &self.handler_id);

        let still_online = self
            .state
            .registry
            .get_online_user_ids(&identity.room_id)
            .contains(&identity.user_id);
        if !still_online {
            self.state
                .registry
                .broadcast(
                    &identity.room_id,
                    ServerEvent::UserLeft {
                        user_id: identity.user_id.to_string(),
                        display_name: identity.display_name,
                    },
                )
                .await;
        }
    }
}

fn parse_role(s: Option<&str>) -> ParticipantRole {
    match s {
        Some("admin") => ParticipantRole::Admin,
        Some("viewer") => ParticipantRole::Viewer,
        _ => ParticipantRole::Member,
    }
}

fn parse_chat_style(s: Option<&str>) -> chatroom_store::types::ChatStyle {
    use chatroom_store::types::ChatStyle;
    match s {
        Some("conversational") => ChatStyle::Conversational,
        Some("detailed") => ChatStyle::Detailed,
        Some("bullet") => ChatStyle::Bullet,
        _ => ChatStyle::Default,
    }
}
