use std::collections::HashMap;
use std::sync::Arc;

use chatroom_core::error::{Result, RoomError};
use chatroom_core::types::{LlmId, MessageId, OptionId, ParticipantKind, PollId, RoomId, UserId};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::types::{
    make_sort_key, ChatStyle, LlmConfiguration, LlmPatch, Message, Participant, ParticipantRole,
    Poll, PollOption, PollOptionSeed, PollStatus, Room, Vote, Visibility,
};

/// Everything that lives inside one room, guarded by a single mutex so that
/// writes to messages, participants, LLMs, and polls within the same room
/// serialize against each other while different rooms proceed independently.
struct RoomRecord {
    room: Room,
    messages: Vec<Message>,
    participants: HashMap<UserId, Participant>,
    polls: HashMap<PollId, Poll>,
    room_polls: Vec<PollId>,
}

#[derive(Default)]
pub struct Store {
    rooms: DashMap<RoomId, Arc<Mutex<RoomRecord>>>,
}

pub struct RoomsPage {
    pub rooms: Vec<Room>,
    pub next_cursor: Option<RoomId>,
}

pub struct HistoryPage {
    pub messages: Vec<Message>,
    pub next_cursor: Option<String>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    #[instrument(skip(self, llms))]
    pub fn create_room(
        &self,
        name: String,
        created_by: UserId,
        llms: Vec<LlmConfiguration>,
        description: String,
        visibility: Visibility,
    ) -> Result<RoomId> {
        let mut seen = std::collections::HashSet::new();
        for llm in &llms {
            if !seen.insert(llm.id.as_str().to_string()) {
                warn!(llm_id = %llm.id, "duplicate llm id in create_room");
                return Err(RoomError::DuplicateLlmId {
                    llm_id: llm.id.as_str().to_string(),
                });
            }
        }

        let room_id = RoomId::new();
        let room = Room {
            room_id: room_id.clone(),
            name,
            description,
            created_at: chrono::Utc::now(),
            created_by,
            visibility,
            llms,
        };
        debug!(room_id = %room_id, "room created");
        self.rooms.insert(
            room_id.clone(),
            Arc::new(Mutex::new(RoomRecord {
                room,
                messages: Vec::new(),
                participants: HashMap::new(),
                polls: HashMap::new(),
                room_polls: Vec::new(),
            })),
        );
        Ok(room_id)
    }

    #[instrument(skip(self))]
    pub async fn get_room(&self, room_id: &RoomId) -> Option<Room> {
        let rec = self.rooms.get(room_id)?.clone();
        let guard = rec.lock().await;
        Some(guard.room.clone())
    }

    /// Sorted by `created_at` descending; filters out private rooms whose
    /// creator differs from `user_id`. `cursor` is the last returned
    /// `room_id`; if absent or not found, resume from the beginning.
    #[instrument(skip(self))]
    pub async fn list_rooms(
        &self,
        user_id: Option<&UserId>,
        limit: usize,
        cursor: Option<&RoomId>,
    ) -> RoomsPage {
        let mut rooms: Vec<Room> = Vec::new();
        for entry in self.rooms.iter() {
            let guard = entry.value().lock().await;
            rooms.push(guard.room.clone());
        }

        rooms.retain(|r| {
            r.visibility != Visibility::Private
                || user_id.is_some_and(|uid| *uid == r.created_by)
        });
        rooms.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let start = cursor
            .and_then(|c| rooms.iter().position(|r| &r.room_id == c))
            .map(|i| i + 1)
            .unwrap_or(0);

        let page: Vec<Room> = rooms.into_iter().skip(start).take(limit).collect();
        let next_cursor = if page.len() == limit {
            page.last().map(|r| r.room_id.clone())
        } else {
            None
        };

        RoomsPage {
            rooms: page,
            next_cursor,
        }
    }

    #[instrument(skip(self))]
    pub async fn add_participant(
        &self,
        room_id: &RoomId,
        user_id: UserId,
        display_name: String,
        role: ParticipantRole,
        title: Option<String>,
        avatar: Option<String>,
    ) -> Result<Participant> {
        let rec = self.room_record(room_id)?;
        let mut guard = rec.lock().await;
        let participant = guard
            .participants
            .entry(user_id.clone())
            .and_modify(|p| {
                p.display_name = display_name.clone();
                p.role = role;
                p.title = title.clone();
                p.avatar = avatar.clone();
            })
            .or_insert_with(|| Participant {
                user_id: user_id.clone(),
                room_id: room_id.clone(),
                display_name,
                role,
                joined_at: chrono::Utc::now(),
                title,
                avatar,
            });
        Ok(participant.clone())
    }

    #[instrument(skip(self))]
    pub async fn get_participants(&self, room_id: &RoomId) -> Result<Vec<Participant>> {
        let rec = self.room_record(room_id)?;
        let guard = rec.lock().await;
        Ok(guard.participants.values().cloned().collect())
    }

    #[instrument(skip(self))]
    pub async fn update_room_description(
        &self,
        room_id: &RoomId,
        description: String,
    ) -> Result<Room> {
        let rec = self.room_record(room_id)?;
        let mut guard = rec.lock().await;
        guard.room.description = description;
        Ok(guard.room.clone())
    }

    #[instrument(skip(self, llm))]
    pub async fn add_llm(&self, room_id: &RoomId, llm: LlmConfiguration) -> Result<()> {
        let rec = self.room_record(room_id)?;
        let mut guard = rec.lock().await;
        if guard.room.llms.iter().any(|l| l.id == llm.id) {
            warn!(room_id = %room_id, llm_id = %llm.id, "add_llm rejected, duplicate id");
            return Err(RoomError::DuplicateLlmId {
                llm_id: llm.id.as_str().to_string(),
            });
        }
        guard.room.llms.push(llm);
        Ok(())
    }

    #[instrument(skip(self, patch))]
    pub async fn update_llm(
        &self,
        room_id: &RoomId,
        llm_id: &LlmId,
        patch: LlmPatch,
    ) -> Result<LlmConfiguration> {
        let rec = self.room_record(room_id)?;
        let mut guard = rec.lock().await;
        let llm = guard
            .room
            .llms
            .iter_mut()
            .find(|l| &l.id == llm_id)
            .ok_or_else(|| RoomError::LlmNotFound {
                llm_id: llm_id.as_str().to_string(),
            })?;
        if let Some(model) = patch.model {
            llm.model = model;
        }
        if let Some(persona) = patch.persona_prompt {
            llm.persona_prompt = persona;
        }
        if let Some(name) = patch.display_name {
            llm.display_name = name;
        }
        if let Some(title) = patch.title {
            llm.title = Some(title);
        }
        if let Some(style) = patch.chat_style {
            llm.chat_style = style;
        }
        if let Some(avatar) = patch.avatar {
            llm.avatar = Some(avatar);
        }
        Ok(llm.clone())
    }

    #[instrument(skip(self))]
    pub async fn remove_llm(&self, room_id: &RoomId, llm_id: &LlmId) -> Result<bool> {
        let rec = self.room_record(room_id)?;
        let mut guard = rec.lock().await;
        let before = guard.room.llms.len();
        guard.room.llms.retain(|l| &l.id != llm_id);
        Ok(guard.room.llms.len() < before)
    }

    /// Appends a message. `message_id` may be supplied so streaming chunk ids
    /// and the stored message id coincide.
    #[instrument(skip(self, content))]
    pub async fn add_message(
        &self,
        room_id: &RoomId,
        sender_id: String,
        sender_name: String,
        sender_type: ParticipantKind,
        content: String,
        reply_to: Option<MessageId>,
        poll_id: Option<PollId>,
        message_id: Option<MessageId>,
    ) -> Result<Message> {
        let rec = self.room_record(room_id)?;
        let mut guard = rec.lock().await;

        let mut id = message_id.unwrap_or_default();
        if guard.messages.iter().any(|m| m.message_id == id) {
            // Collision on unified streaming id: reject-and-regenerate once
            // rather than silently overwriting.
            warn!(message_id = %id, "message id collision, regenerating");
            id = MessageId::new();
            if guard.messages.iter().any(|m| m.message_id == id) {
                return Err(RoomError::Internal(
                    "message id collision persisted after regeneration".into(),
                ));
            }
        }

        let timestamp = chrono::Utc::now();
        let sort_key = make_sort_key(timestamp, &id);
        let message = Message {
            message_id: id,
            room_id: room_id.clone(),
            sender_id,
            sender_name,
            sender_type,
            content,
            reply_to,
            poll_id,
            timestamp,
            sort_key,
        };
        guard.messages.push(message.clone());
        Ok(message)
    }

    /// Cursor-backward pagination: returns up to `limit` messages strictly
    /// older than `cursor` (a sort key), chronological ascending.
    #[instrument(skip(self))]
    pub async fn load_history(
        &self,
        room_id: &RoomId,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<HistoryPage> {
        let rec = self.room_record(room_id)?;
        let guard = rec.lock().await;

        let end = cursor
            .and_then(|c| guard.messages.iter().position(|m| m.sort_key == c))
            .unwrap_or(guard.messages.len());

        let start = end.saturating_sub(limit);
        let page: Vec<Message> = guard.messages[start..end].to_vec();
        let next_cursor = if start > 0 {
            page.first().map(|m| m.sort_key.clone())
        } else {
            None
        };

        Ok(HistoryPage {
            messages: page,
            next_cursor,
        })
    }

    #[instrument(skip(self, question, options))]
    pub async fn create_poll(
        &self,
        room_id: &RoomId,
        creator_id: String,
        creator_name: String,
        creator_type: ParticipantKind,
        question: String,
        options: Vec<PollOptionSeed>,
        allow_multiple: bool,
        anonymous: bool,
        mandatory: bool,
    ) -> Result<Poll> {
        if options.len() < 2 {
            return Err(RoomError::InvalidPoll);
        }
        // validated room exists
        let rec = self.room_record(room_id)?;
        let mut guard = rec.lock().await;

        let poll_id = PollId::new();
        let stored_options: Vec<PollOption> = options
            .into_iter()
            .map(|seed| PollOption {
                id: OptionId::new(),
                text: seed.text,
                description: seed.description,
                votes: Vec::new(),
            })
            .collect();

        let poll = Poll {
            poll_id: poll_id.clone(),
            room_id: room_id.clone(),
            creator_id,
            creator_name,
            creator_type,
            question,
            options: stored_options,
            allow_multiple,
            anonymous,
            mandatory,
            status: PollStatus::Open,
            created_at: chrono::Utc::now(),
            closed_at: None,
        };

        guard.polls.insert(poll_id.clone(), poll.clone());
        guard.room_polls.push(poll_id);
        Ok(poll)
    }

    #[instrument(skip(self))]
    pub async fn get_poll(&self, room_id: &RoomId, poll_id: &PollId) -> Result<Poll> {
        let rec = self.room_record(room_id)?;
        let guard = rec.lock().await;
        guard
            .polls
            .get(poll_id)
            .cloned()
            .ok_or_else(|| RoomError::PollNotFound {
                poll_id: poll_id.as_str().to_string(),
            })
    }

    #[instrument(skip(self))]
    pub async fn list_room_polls(&self, room_id: &RoomId, active_only: bool) -> Result<Vec<Poll>> {
        let rec = self.room_record(room_id)?;
        let guard = rec.lock().await;
        let mut polls: Vec<Poll> = guard
            .room_polls
            .iter()
            .filter_map(|pid| guard.polls.get(pid).cloned())
            .collect();
        if active_only {
            polls.retain(|p| p.status == PollStatus::Open);
        }
        Ok(polls)
    }

    /// Atomically applies the "replace prior votes if not allow_multiple"
    /// step and the duplicate-vote check within one critical section.
    /// Returns `None` on duplicate-on-same-option, unknown poll/option, or a
    /// closed poll — callers translate that into a dropped side-effect, not
    /// an error event.
    #[instrument(skip(self, voter_name, reason))]
    pub async fn add_vote(
        &self,
        room_id: &RoomId,
        poll_id: &PollId,
        option_id: &OptionId,
        voter_id: String,
        voter_name: String,
        reason: Option<String>,
    ) -> Result<Option<(Poll, PollOption, Vote)>> {
        let rec = self.room_record(room_id)?;
        let mut guard = rec.lock().await;

        let Some(poll) = guard.polls.get_mut(poll_id) else {
            return Ok(None);
        };
        if poll.status != PollStatus::Open {
            return Ok(None);
        }
        if !poll.options.iter().any(|o| &o.id == option_id) {
            return Ok(None);
        }
        let target = poll
            .options
            .iter()
            .find(|o| &o.id == option_id)
            .expect("checked above");
        if target.votes.iter().any(|v| v.voter_id == voter_id) {
            return Ok(None);
        }

        let allow_multiple = poll.allow_multiple;
        if !allow_multiple {
            for opt in poll.options.iter_mut() {
                opt.votes.retain(|v| v.voter_id != voter_id);
            }
        }

        let vote = Vote {
            voter_id,
            voter_name,
            reason,
            voted_at: chrono::Utc::now(),
        };

        let option = poll
            .options
            .iter_mut()
            .find(|o| &o.id == option_id)
            .expect("checked above");
        option.votes.push(vote.clone());

        Ok(Some((poll.clone(), option.clone(), vote)))
    }

    /// Idempotent on an already-closed poll.
    #[instrument(skip(self))]
    pub async fn close_poll(&self, room_id: &RoomId, poll_id: &PollId) -> Result<Poll> {
        let rec = self.room_record(room_id)?;
        let mut guard = rec.lock().await;
        let poll = guard
            .polls
            .get_mut(poll_id)
            .ok_or_else(|| RoomError::PollNotFound {
                poll_id: poll_id.as_str().to_string(),
            })?;
        if poll.status == PollStatus::Open {
            poll.status = PollStatus::Closed;
            poll.closed_at = Some(chrono::Utc::now());
        }
        Ok(poll.clone())
    }

    fn room_record(&self, room_id: &RoomId) -> Result<Arc<Mutex<RoomRecord>>> {
        self.rooms
            .get(room_id)
            .map(|r| r.clone())
            .ok_or_else(|| RoomError::RoomNotFound {
                room_id: room_id.as_str().to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn llm(id: &str) -> LlmConfiguration {
        LlmConfiguration {
            id: LlmId::from(id),
            model: "test-model".into(),
            persona_prompt: "you are helpful".into(),
            display_name: id.to_string(),
            title: None,
            chat_style: ChatStyle::Default,
            avatar: None,
        }
    }

    #[tokio::test]
    async fn create_room_rejects_duplicate_llm_ids() {
        let store = Store::new();
        let err = store.create_room(
            "room".into(),
            UserId::from("alice"),
            vec![llm("claude"), llm("claude")],
            "".into(),
            Visibility::Public,
        );
        assert!(matches!(err, Err(RoomError::DuplicateLlmId { .. })));
    }

    #[tokio::test]
    async fn append_only_history_is_prefix_of_ground_truth() {
        let store = Store::new();
        let room_id = store
            .create_room(
                "room".into(),
                UserId::from("alice"),
                vec![],
                "".into(),
                Visibility::Public,
            )
            .unwrap();

        let mut ids = Vec::new();
        for i in 0..120 {
            let msg = store
                .add_message(
                    &room_id,
                    "alice".into(),
                    "Alice".into(),
                    ParticipantKind::Human,
                    format!("msg {i}"),
                    None,
                    None,
                    None,
                )
                .await
                .unwrap();
            ids.push(msg.message_id);
        }

        let page1 = store.load_history(&room_id, 50, None).await.unwrap();
        assert_eq!(page1.messages.len(), 50);
        assert!(page1.next_cursor.is_some());

        let page2 = store
            .load_history(&room_id, 50, page1.next_cursor.as_deref())
            .await
            .unwrap();
        assert_eq!(page2.messages.len(), 50);

        let page3 = store
            .load_history(&room_id, 50, page2.next_cursor.as_deref())
            .await
            .unwrap();
        assert_eq!(page3.messages.len(), 20);
        assert!(page3.next_cursor.is_none());

        let mut reconstructed: Vec<MessageId> = Vec::new();
        reconstructed.extend(page3.messages.iter().map(|m| m.message_id.clone()));
        reconstructed.extend(page2.messages.iter().map(|m| m.message_id.clone()));
        reconstructed.extend(page1.messages.iter().map(|m| m.message_id.clone()));
        assert_eq!(reconstructed, ids);
    }

    #[tokio::test]
    async fn single_choice_poll_keeps_exactly_one_vote_per_voter() {
        let store = Store::new();
        let room_id = store
            .create_room(
                "room".into(),
                UserId::from("alice"),
                vec![],
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
                "Pick lunch".into(),
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
                false,
            )
            .await
            .unwrap();

        let opt_a = poll.options[0].id.clone();
        let opt_b = poll.options[1].id.clone();

        store
            .add_vote(
                &room_id,
                &poll.poll_id,
                &opt_a,
                "bob".into(),
                "Bob".into(),
                None,
            )
            .await
            .unwrap();
        store
            .add_vote(
                &room_id,
                &poll.poll_id,
                &opt_b,
                "bob".into(),
                "Bob".into(),
                None,
            )
            .await
            .unwrap();

        let refreshed = store.get_poll(&room_id, &poll.poll_id).await.unwrap();
        let total_bob_votes: usize = refreshed
            .options
            .iter()
            .map(|o| o.votes.iter().filter(|v| v.voter_id == "bob").count())
            .sum();
        assert_eq!(total_bob_votes, 1);
        assert!(refreshed.options[1].votes.iter().any(|v| v.voter_id == "bob"));
    }

    #[tokio::test]
    async fn list_rooms_hides_private_rooms_from_non_creators() {
        let store = Store::new();
        store
            .create_room(
                "secret".into(),
                UserId::from("alice"),
                vec![],
                "".into(),
                Visibility::Private,
            )
            .unwrap();

        let page = store.list_rooms(Some(&UserId::from("bob")), 20, None).await;
        assert!(page.rooms.is_empty());

        let page = store.list_rooms(Some(&UserId::from("alice")), 20, None).await;
        assert_eq!(page.rooms.len(), 1);
    }
}
