//! Tool definitions offered to the Chat Provider so a model can opt out of
//! replying, address another participant by name, or act on an open poll.

use chatroom_provider::ToolDefinition;
use chatroom_store::types::Poll;
use serde_json::json;

fn opt_out_tool() -> ToolDefinition {
    ToolDefinition {
        name: "opt_out".into(),
        description: "RARELY use this tool to decline responding. Only use when: (1) you were \
            explicitly mentioned but the question was clearly directed at someone else, (2) \
            your character would genuinely stay silent based on personality (not just \
            uncertainty). When in doubt, RESPOND rather than opting out."
            .into(),
        parameters_json: json!({
            "type": "object",
            "properties": {
                "reason": {"type": "string", "description": "Brief reason for opting out (for logging)"}
            },
            "required": [],
        }),
    }
}

fn mention_tool(llm_names: &[String]) -> ToolDefinition {
    ToolDefinition {
        name: "mention".into(),
        description: format!(
            "Use this tool to tag another participant and request their response. Available \
             participants: {}. Use this when you want to ask someone a question, delegate a \
             task, or invite them into the conversation.",
            llm_names.join(", ")
        ),
        parameters_json: json!({
            "type": "object",
            "properties": {
                "participant": {"type": "string", "description": "Name of the participant to mention"},
                "context": {"type": "string", "description": "Why you're mentioning them (optional)"}
            },
            "required": ["participant"],
        }),
    }
}

fn vote_on_poll_tool(description: String) -> ToolDefinition {
    ToolDefinition {
        name: "vote_on_poll".into(),
        description,
        parameters_json: json!({
            "type": "object",
            "properties": {
                "poll_id": {"type": "string", "description": "ID of the poll to vote on"},
                "option_ids": {"type": "array", "items": {"type": "string"}, "description": "ID(s) of the option(s) to vote for"},
                "reason": {"type": "string", "description": "Brief explanation for your vote (optional)"}
            },
            "required": ["poll_id", "option_ids"],
        }),
    }
}

/// Tools for a general reply call: `opt_out`, `mention`, `vote_on_poll`, and
/// a synthetic `get_active_polls` when any polls are open.
pub fn build_room_tools(llm_names: &[String], active_polls: &[Poll]) -> Vec<ToolDefinition> {
    let mut tools = vec![
        opt_out_tool(),
        mention_tool(llm_names),
        vote_on_poll_tool(
            "Cast your vote on an active poll. You can provide reasoning for your choice.".into(),
        ),
    ];

    if !active_polls.is_empty() {
        let descriptions: Vec<String> = active_polls
            .iter()
            .map(|p| {
                let opts = p
                    .options
                    .iter()
                    .map(|o| format!("{}: \"{}\"", o.id, o.text))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("Poll \"{}\" (id={}): [{}]", p.question, p.poll_id, opts)
            })
            .collect();
        tools.push(ToolDefinition {
            name: "get_active_polls".into(),
            description: format!(
                "Get information about active polls in this room. Current polls: {}",
                descriptions.join("; ")
            ),
            parameters_json: json!({"type": "object", "properties": {}}),
        });
    }

    tools
}

/// Narrowed tool set for a poll-voting call: just `vote_on_poll` (+
/// `opt_out` iff the poll is not mandatory).
pub fn build_poll_tools(poll: &Poll, mandatory: bool) -> Vec<ToolDefinition> {
    let options_desc = poll
        .options
        .iter()
        .map(|o| format!("{}: \"{}\"", o.id, o.text))
        .collect::<Vec<_>>()
        .join(", ");

    let mut tools = Vec::new();
    if !mandatory {
        tools.push(ToolDefinition {
            name: "opt_out".into(),
            description: "Use this to decline voting if none of the options fit your view. You \
                should still provide a text response explaining why."
                .into(),
            parameters_json: json!({
                "type": "object",
                "properties": {"reason": {"type": "string", "description": "Why you're not voting"}},
                "required": ["reason"],
            }),
        });
    }

    let required_prefix = if mandatory {
        "REQUIRED - YOU MUST USE THIS TOOL: "
    } else {
        ""
    };
    tools.push(vote_on_poll_tool(format!(
        "{required_prefix}Cast your vote on the poll. Question: \"{question}\". Available \
         options: [{options_desc}]. Use poll_id=\"{poll_id}\" and set option_ids to the ID(s) \
         you choose.",
        question = poll.question,
        poll_id = poll.poll_id,
    )));
    tools
}
