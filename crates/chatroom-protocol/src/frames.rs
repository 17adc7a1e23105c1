use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Client → Server. One variant per inbound frame tag; unknown tags are not
/// representable here and are dropped by the caller via
/// `InboundFrame::as_client_frame` rather than closing the stream (forward
/// compatibility).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Join {
        room_id: String,
        user_id: String,
        display_name: String,
        #[serde(default)]
        role: Option<String>,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        avatar: Option<String>,
    },
    Message {
        content: String,
        #[serde(default)]
        mentions: Vec<String>,
        #[serde(default)]
        reply_to: Option<String>,
    },
    Typing,
    Interrupt {
        llm_id: String,
    },
    AddLlm {
        id: String,
        model: String,
        persona_prompt: String,
        display_name: String,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        chat_style: Option<String>,
        #[serde(default)]
        avatar: Option<String>,
    },
    UpdateLlm {
        id: String,
        #[serde(default)]
        model: Option<String>,
        #[serde(default)]
        persona_prompt: Option<String>,
        #[serde(default)]
        display_name: Option<String>,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        chat_style: Option<String>,
        #[serde(default)]
        avatar: Option<String>,
    },
    RemoveLlm {
        id: String,
    },
    UpdateRoomDescription {
        description: String,
    },
    CreatePoll {
        question: String,
        options: Vec<PollOptionInput>,
        #[serde(default)]
        allow_multiple: bool,
        #[serde(default)]
        anonymous: bool,
        #[serde(default)]
        mandatory: bool,
    },
    CastVote {
        poll_id: String,
        option_ids: Vec<String>,
        #[serde(default)]
        reason: Option<String>,
    },
    ClosePoll {
        poll_id: String,
    },
    Ping,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollOptionInput {
    pub text: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Server → Client. One variant per outbound event kind. Timestamps are
/// milliseconds since epoch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    RoomState {
        room: RoomInfo,
        participants: Vec<ParticipantInfo>,
        messages: Vec<MessageInfo>,
        polls: Vec<PollInfo>,
    },
    MessageReceived {
        message: MessageInfo,
    },
    UserJoined {
        user_id: String,
        display_name: String,
    },
    UserLeft {
        user_id: String,
        display_name: String,
    },
    UserTyping {
        user_id: String,
        display_name: String,
    },
    LlmThinking {
        llm_id: String,
        reply_to: Option<String>,
    },
    LlmChunk {
        message_id: String,
        llm_id: String,
        content: String,
        reply_to: Option<String>,
    },
    LlmDone {
        message_id: Option<String>,
        llm_id: String,
        reply_to: Option<String>,
    },
    LlmAdded {
        llm: LlmInfo,
    },
    LlmUpdated {
        llm: LlmInfo,
    },
    LlmRemoved {
        llm_id: String,
    },
    RoomUpdated {
        description: String,
    },
    PollCreated {
        poll: PollInfo,
    },
    PollVoted {
        poll_id: String,
        option_id: String,
        voter_id: String,
        voter_name: String,
    },
    PollClosed {
        poll_id: String,
    },
    Error {
        code: String,
        message: String,
    },
    Pong,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomInfo {
    pub room_id: String,
    pub name: String,
    pub description: String,
    pub created_at: i64,
    pub created_by: String,
    pub visibility: String,
    pub llms: Vec<LlmInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmInfo {
    pub id: String,
    pub model: String,
    pub persona_prompt: String,
    pub display_name: String,
    pub title: Option<String>,
    pub chat_style: String,
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub user_id: String,
    pub display_name: String,
    pub role: String,
    pub title: Option<String>,
    pub avatar: Option<String>,
    pub is_online: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageInfo {
    pub message_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub sender_type: String,
    pub content: String,
    pub reply_to: Option<String>,
    pub poll_id: Option<String>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollInfo {
    pub poll_id: String,
    pub question: String,
    pub options: Vec<PollOptionInfo>,
    pub allow_multiple: bool,
    pub anonymous: bool,
    pub mandatory: bool,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollOptionInfo {
    pub option_id: String,
    pub text: String,
    pub description: Option<String>,
    pub votes: Vec<VoteInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteInfo {
    pub voter_id: String,
    pub voter_name: String,
    pub reason: Option<String>,
    pub voted_at: i64,
}

/// Raw inbound frame — read the `type` tag, then attempt to decode the rest
/// as a `ClientFrame`. Reading the discriminator first means malformed or
/// unrecognized tags can be dropped instead of closing the stream.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundFrame {
    #[serde(rename = "type")]
    pub frame_type: String,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, Value>,
}

impl InboundFrame {
    pub fn as_client_frame(&self) -> Option<ClientFrame> {
        let mut map = self.rest.clone();
        map.insert("type".to_string(), Value::String(self.frame_type.clone()));
        serde_json::from_value(Value::Object(map)).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frame_tag_roundtrip() {
        let frame = ClientFrame::Message {
            content: "hi".into(),
            mentions: vec!["claude".into()],
            reply_to: None,
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "message");
        let back: ClientFrame = serde_json::from_value(json).unwrap();
        assert!(matches!(back, ClientFrame::Message { .. }));
    }

    #[test]
    fn unknown_tag_is_dropped_not_rejected() {
        let raw: InboundFrame =
            serde_json::from_value(serde_json::json!({"type": "not_a_real_tag"})).unwrap();
        assert!(raw.as_client_frame().is_none());
    }

    #[test]
    fn server_event_tag_roundtrip() {
        let event = ServerEvent::LlmDone {
            message_id: Some("abc123".into()),
            llm_id: "claude".into(),
            reply_to: Some("trigger".into()),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "llm_done");
    }
}
