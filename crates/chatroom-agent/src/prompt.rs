//! System-prompt assembly: style directive, persona, room context, identity
//! rule, mention handling, then the tool preamble.

use chatroom_store::types::{ChatStyle, LlmConfiguration, Poll, Room};

/// Chat-style directive table.
fn style_directive(style: ChatStyle) -> Option<&'static str> {
    match style {
        ChatStyle::Default => None,
        ChatStyle::Conversational => Some(
            "Reply in a casual, Slack-style voice: 1-2 sentences, no preamble.",
        ),
        ChatStyle::Detailed => Some(
            "Reply thoroughly and in a structured way; it's fine to use multiple paragraphs.",
        ),
        ChatStyle::Bullet => Some("Reply as a short, scannable bulleted list."),
    }
}

/// Builds the system prompt for a general (non-poll) LLM call.
pub fn build_system_prompt(llm: &LlmConfiguration, room: &Room, online_humans: &[String]) -> String {
    let mut parts: Vec<String> = Vec::new();

    if let Some(directive) = style_directive(llm.chat_style) {
        parts.push(directive.to_string());
    }

    if !llm.persona_prompt.is_empty() {
        parts.push(llm.persona_prompt.clone());
    }

    parts.push(format!(
        "You are in a collaborative room called \"{}\".",
        room.name
    ));

    if !room.description.is_empty() {
        parts.push(format!("Room context: {}", room.description));
    }

    parts.push(
        "Multiple participants (humans and AI assistants) are chatting together. \
         Messages are prefixed with the sender's name so you can tell who said what."
            .to_string(),
    );

    if !online_humans.is_empty() {
        parts.push(format!("Online humans: {}.", online_humans.join(", ")));
    }

    let other_llms: Vec<&str> = room
        .llms
        .iter()
        .filter(|l| l.id != llm.id)
        .map(|l| l.display_name.as_str())
        .collect();
    if !other_llms.is_empty() {
        parts.push(format!(
            "Other AI assistants in this room: {}.",
            other_llms.join(", ")
        ));
    }

    parts.push(format!(
        "You are {}; never speak as another participant. When you see a message like \
         \"Alice: hello\", Alice is the speaker — do NOT prefix your own responses with your \
         own name, just respond naturally as part of the conversation.",
        llm.display_name
    ));

    parts.push(format!(
        "**Multi-mention handling:** When a user mentions multiple participants in one \
         message, they may assign different tasks to each, e.g. \"@Alex please review the \
         architecture. @{name} please implement the feature.\" In this case, YOU ({name}) \
         should respond to the portion addressed to you — look for your name and focus on \
         what follows until the next @mention.",
        name = llm.display_name
    ));

    parts.push(
        "You have access to tools: `opt_out` to decline responding (rarely — only when the \
         message is clearly directed at someone else), and `mention` to tag another \
         participant and invite them to respond. Prefer responding over opting out; your \
         input is valuable to the conversation."
            .to_string(),
    );

    parts.join("\n\n")
}

/// Appends the poll-voting section to a general-call system prompt.
pub fn append_poll_section(base: String, poll: &Poll, mandatory: bool) -> String {
    let options_text = poll
        .options
        .iter()
        .map(|o| format!("{}: {}", o.id, o.text))
        .collect::<Vec<_>>()
        .join(", ");
    let mandatory_text = if mandatory {
        "This is a MANDATORY poll — you MUST cast a vote using the vote_on_poll tool."
    } else {
        "Please vote or explain why none of the options fit."
    };
    format!(
        "{base}\n\n**POLL VOTING REQUEST**\nA poll has been created: \"{question}\"\n\
         {mandatory_text}\nPoll ID: {poll_id}\nOptions: {options_text}\nUse the vote_on_poll \
         tool to cast your vote.",
        base = base,
        question = poll.question,
        poll_id = poll.poll_id,
    )
}
