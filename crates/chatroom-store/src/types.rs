use chatroom_core::types::{LlmId, MessageId, OptionId, ParticipantKind, PollId, RoomId, UserId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Admin,
    Member,
    Viewer,
}

/// Chat-style directive used to prefix an LLM's system prompt section.
/// `Default` (0) means "no special directive."
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatStyle {
    Default,
    Conversational,
    Detailed,
    Bullet,
}

impl Default for ChatStyle {
    fn default() -> Self {
        ChatStyle::Default
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfiguration {
    pub id: LlmId,
    pub model: String,
    pub persona_prompt: String,
    pub display_name: String,
    pub title: Option<String>,
    pub chat_style: ChatStyle,
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub room_id: RoomId,
    pub name: String,
    pub description: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub created_by: UserId,
    pub visibility: Visibility,
    pub llms: Vec<LlmConfiguration>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: UserId,
    pub room_id: RoomId,
    pub display_name: String,
    pub role: ParticipantRole,
    pub joined_at: chrono::DateTime<chrono::Utc>,
    pub title: Option<String>,
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: MessageId,
    pub room_id: RoomId,
    pub sender_id: String,
    pub sender_name: String,
    pub sender_type: ParticipantKind,
    pub content: String,
    pub reply_to: Option<MessageId>,
    pub poll_id: Option<PollId>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub sort_key: String,
}

/// `epoch_ms` is zero-padded to 20 digits (`i64::MAX` is 19 digits) so
/// lexicographic and chronological order agree even across a sign change.
pub fn make_sort_key(ts: chrono::DateTime<chrono::Utc>, message_id: &MessageId) -> String {
    format!("MSG#{:020}#{}", ts.timestamp_millis(), message_id)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub voter_id: String,
    pub voter_name: String,
    pub reason: Option<String>,
    pub voted_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollOption {
    pub id: OptionId,
    pub text: String,
    pub description: Option<String>,
    pub votes: Vec<Vote>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Poll {
    pub poll_id: PollId,
    pub room_id: RoomId,
    pub creator_id: String,
    pub creator_name: String,
    pub creator_type: ParticipantKind,
    pub question: String,
    pub options: Vec<PollOption>,
    pub allow_multiple: bool,
    pub anonymous: bool,
    pub mandatory: bool,
    pub status: PollStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub closed_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Input shape for `Store::create_poll` — text/description pairs before ids
/// are minted.
#[derive(Debug, Clone)]
pub struct PollOptionSeed {
    pub text: String,
    pub description: Option<String>,
}

/// Per-field patch for `Store::update_llm`; `None` leaves the field untouched.
#[derive(Debug, Clone, Default)]
pub struct LlmPatch {
    pub model: Option<String>,
    pub persona_prompt: Option<String>,
    pub display_name: Option<String>,
    pub title: Option<String>,
    pub chat_style: Option<ChatStyle>,
    pub avatar: Option<String>,
}
