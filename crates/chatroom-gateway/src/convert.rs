//! `chatroom-store` record → `chatroom-protocol` wire-info conversions.
//!
//! Lives in the gateway because `chatroom-protocol` only depends on
//! `chatroom-core` (not `chatroom-store`) — the wire vocabulary is meant to
//! stay implementation-agnostic of the Store's in-memory layout.

use std::collections::HashSet;

use chatroom_core::types::UserId;
use chatroom_protocol::frames::{
    LlmInfo, MessageInfo, ParticipantInfo, PollInfo, PollOptionInfo, RoomInfo, VoteInfo,
};
use chatroom_store::types::{LlmConfiguration, Message, Participant, Poll, Room};

pub fn llm_info(llm: &LlmConfiguration) -> LlmInfo {
    LlmInfo {
        id: llm.id.to_string(),
        model: llm.model.clone(),
        persona_prompt: llm.persona_prompt.clone(),
        display_name: llm.display_name.clone(),
        title: llm.title.clone(),
        chat_style: chat_style_str(llm.chat_style).to_string(),
        avatar: llm.avatar.clone(),
    }
}

fn chat_style_str(style: chatroom_store::types::ChatStyle) -> &'static str {
    use chatroom_store::types::ChatStyle;
    match style {
        ChatStyle::Default => "default",
        ChatStyle::Conversational => "conversational",
        ChatStyle::Detailed => "detailed",
        ChatStyle::Bullet => "bullet",
    }
}

pub fn room_info(room: &Room) -> RoomInfo {
    RoomInfo {
        room_id: room.room_id.to_string(),
        name: room.name.clone(),
        description: room.description.clone(),
        created_at: room.created_at.timestamp_millis(),
        created_by: room.created_by.to_string(),
        visibility: match room.visibility {
            chatroom_store::types::Visibility::Public => "public".to_string(),
            chatroom_store::types::Visibility::Private => "private".to_string(),
        },
        llms: room.llms.iter().map(llm_info).collect(),
    }
}

pub fn participant_info(p: &Participant, online: &HashSet<UserId>) -> ParticipantInfo {
    ParticipantInfo {
        user_id: p.user_id.to_string(),
        display_name: p.display_name.clone(),
        role: match p.role {
            chatroom_store::types::ParticipantRole::Admin => "admin".to_string(),
            chatroom_store::types::ParticipantRole::Member => "member".to_string(),
            chatroom_store::types::ParticipantRole::Viewer => "viewer".to_string(),
        },
        title: p.title.clone(),
        avatar: p.avatar.clone(),
        is_online: online.contains(&p.user_id),
    }
}

pub fn message_info(m: &Message) -> MessageInfo {
    MessageInfo {
        message_id: m.message_id.to_string(),
        sender_id: m.sender_id.clone(),
        sender_name: m.sender_name.clone(),
        sender_type: match m.sender_type {
            chatroom_core::types::ParticipantKind::Human => "human".to_string(),
            chatroom_core::types::ParticipantKind::Llm => "llm".to_string(),
        },
        content: m.content.clone(),
        reply_to: m.reply_to.as_ref().map(|id| id.to_string()),
        poll_id: m.poll_id.as_ref().map(|id| id.to_string()),
        timestamp: m.timestamp.timestamp_millis(),
    }
}

pub fn poll_info(poll: &Poll) -> PollInfo {
    PollInfo {
        poll_id: poll.poll_id.to_string(),
        question: poll.question.clone(),
        options: poll
            .options
            .iter()
            .map(|o| PollOptionInfo {
                option_id: o.id.to_string(),
                text: o.text.clone(),
                description: o.description.clone(),
                votes: o
                    .votes
                    .iter()
                    .map(|v| VoteInfo {
                        voter_id: v.voter_id.clone(),
                        voter_name: v.voter_name.clone(),
                        reason: v.reason.clone(),
                        voted_at: v.voted_at.timestamp_millis(),
                    })
                    .collect(),
            })
            .collect(),
        allow_multiple: poll.allow_multiple,
        anonymous: poll.anonymous,
        mandatory: poll.mandatory,
        status: match poll.status {
            chatroom_store::types::PollStatus::Open => "open".to_string(),
            chatroom_store::types::PollStatus::Closed => "closed".to_string(),
        },
    }
}
