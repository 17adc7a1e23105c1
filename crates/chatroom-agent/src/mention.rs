//! `@name` / `@all` extraction and LLM lookup.

use std::collections::HashMap;

use chatroom_core::types::LlmId;
use chatroom_store::types::LlmConfiguration;
use once_cell::sync::Lazy;
use regex::Regex;

/// Matches `@` followed by word characters (including CJK U+4E00-U+9FFF) and
/// hyphens.
static MENTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@([\w\u{4e00}-\u{9fff}-]+)").unwrap());

/// `@all` / `@everyone` as whole tokens, case-insensitive, not preceded or
/// followed by another word/CJK character.
static MENTION_ALL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:^|[^\w\u{4e00}-\u{9fff}])@(all|everyone)(?:$|[^\w\u{4e00}-\u{9fff}])").unwrap()
});

/// Strip leading `@`, strip trailing punctuation, lowercase.
pub fn normalize_mention(token: &str) -> String {
    token
        .trim()
        .trim_start_matches('@')
        .trim_end_matches(|c| ".,!?;:".contains(c))
        .to_lowercase()
}

/// Remove up to 3 repeated leading `"<name>:"` / `"<name> -"` style prefixes
/// from model output.
pub fn strip_self_name_prefix(text: &str, display_name: &str) -> String {
    let name = display_name.trim();
    if text.is_empty() || name.is_empty() {
        return text.to_string();
    }
    let escaped = regex::escape(name);
    let prefix_re = match Regex::new(&format!(r"(?i)^\s*{escaped}\s*[:\-]\s*")) {
        Ok(re) => re,
        Err(_) => return text.to_string(),
    };

    let mut cleaned = text.to_string();
    for _ in 0..3 {
        let updated = prefix_re.replace(&cleaned, "").into_owned();
        if updated == cleaned {
            break;
        }
        cleaned = updated;
    }
    cleaned.trim_start().to_string()
}

/// Case-insensitive index of a room's LLMs by `id`, `display_name`, and
/// `display_name` with spaces replaced by underscores.
struct LlmLookup<'a> {
    by_key: HashMap<String, &'a LlmConfiguration>,
}

impl<'a> LlmLookup<'a> {
    fn build(llms: &'a [LlmConfiguration]) -> Self {
        let mut by_key = HashMap::new();
        for llm in llms {
            by_key.insert(llm.id.as_str().to_lowercase(), llm);
            by_key.insert(llm.display_name.to_lowercase(), llm);
            by_key.insert(llm.display_name.to_lowercase().replace(' ', "_"), llm);
        }
        Self { by_key }
    }

    fn get(&self, key: &str) -> Option<&'a LlmConfiguration> {
        self.by_key.get(key).copied()
    }
}

/// Parses `content` for `@mentions`, merges in `client_mentions`, and
/// resolves each against `llms`. `@all`/`@everyone` resolves to every LLM.
/// Duplicates collapse; ordering follows first occurrence.
pub fn match_llms_from_mentions<'a>(
    content: &str,
    client_mentions: &[String],
    llms: &'a [LlmConfiguration],
) -> Vec<&'a LlmConfiguration> {
    let has_mention_all = MENTION_ALL_RE.is_match(content);

    let mut ordered_tokens: Vec<String> = Vec::new();
    let mut seen_tokens = std::collections::HashSet::new();
    for raw in client_mentions
        .iter()
        .map(|s| s.as_str())
        .chain(MENTION_RE.captures_iter(content).map(|c| {
            // captures_iter borrows `content`; leak a &str-compatible owned
            // String via get(1) and normalize immediately below.
            c.get(1).map(|m| m.as_str()).unwrap_or_default()
        }))
    {
        let normalized = normalize_mention(raw);
        if normalized.is_empty() {
            continue;
        }
        if seen_tokens.insert(normalized.clone()) {
            ordered_tokens.push(normalized);
        }
    }

    if has_mention_all || ordered_tokens.iter().any(|t| t == "all" || t == "everyone") {
        return llms.iter().collect();
    }

    let lookup = LlmLookup::build(llms);
    let mut matched: Vec<&LlmConfiguration> = Vec::new();
    for token in ordered_tokens {
        if let Some(llm) = lookup.get(&token) {
            if !matched.iter().any(|m| m.id == llm.id) {
                matched.push(llm);
            }
        }
    }
    matched
}

/// Raw `@name` tokens found in free text, normalized, deduplicated,
/// preserving first-occurrence order. Used as a fallback when a model
/// mentions a participant in prose instead of via the `mention` tool.
pub fn text_mentions(content: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for cap in MENTION_RE.captures_iter(content) {
        let raw = cap.get(1).map(|m| m.as_str()).unwrap_or_default();
        let normalized = normalize_mention(raw);
        if !normalized.is_empty() && seen.insert(normalized.clone()) {
            out.push(normalized);
        }
    }
    out
}

/// Same lookup used for LLM-to-LLM mention chaining, with an exclusion to
/// prevent self-mention loops.
pub fn match_llm_from_name<'a>(
    name: &str,
    llms: &'a [LlmConfiguration],
    exclude_id: Option<&LlmId>,
) -> Option<&'a LlmConfiguration> {
    let lookup = LlmLookup::build(llms);
    let normalized = name.trim().to_lowercase();
    let llm = lookup.get(&normalized)?;
    if let Some(excluded) = exclude_id {
        if &llm.id == excluded {
            return None;
        }
    }
    Some(llm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatroom_core::types::LlmId;
    use chatroom_store::types::ChatStyle;

    fn llm(id: &str, display_name: &str) -> LlmConfiguration {
        LlmConfiguration {
            id: LlmId::from(id),
            model: "test-model".into(),
            persona_prompt: "".into(),
            display_name: display_name.into(),
            title: None,
            chat_style: ChatStyle::Default,
            avatar: None,
        }
    }

    #[test]
    fn normalize_strips_at_and_punctuation() {
        assert_eq!(normalize_mention("@Claude,"), "claude");
        assert_eq!(normalize_mention("Gemini!"), "gemini");
    }

    #[test]
    fn single_mention_resolves_one_llm() {
        let llms = vec![llm("claude", "Claude"), llm("gemini", "Gemini")];
        let matched = match_llms_from_mentions("Hey @Claude, what's up?", &[], &llms);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].id, LlmId::from("claude"));
    }

    #[test]
    fn everyone_fans_out_to_all_llms() {
        let llms = vec![llm("claude", "Claude"), llm("gemini", "Gemini")];
        let matched = match_llms_from_mentions("@everyone please summarize", &[], &llms);
        assert_eq!(matched.len(), 2);
    }

    #[test]
    fn mention_idempotence_same_content_resolves_same_ordered_list() {
        let llms = vec![llm("claude", "Claude"), llm("gemini", "Gemini")];
        let a = match_llms_from_mentions("@Gemini and @Claude", &[], &llms);
        let b = match_llms_from_mentions("@Gemini and @Claude", &[], &llms);
        let ids_a: Vec<_> = a.iter().map(|l| l.id.clone()).collect();
        let ids_b: Vec<_> = b.iter().map(|l| l.id.clone()).collect();
        assert_eq!(ids_a, ids_b);
        assert_eq!(ids_a, vec![LlmId::from("gemini"), LlmId::from("claude")]);
    }

    #[test]
    fn self_chain_is_excluded() {
        let llms = vec![llm("claude", "Claude"), llm("gemini", "Gemini")];
        let found = match_llm_from_name("claude", &llms, Some(&LlmId::from("claude")));
        assert!(found.is_none());
        let found = match_llm_from_name("claude", &llms, Some(&LlmId::from("gemini")));
        assert!(found.is_some());
    }

    #[test]
    fn strips_repeated_self_name_prefixes() {
        let out = strip_self_name_prefix("Claude: Claude - hello there", "Claude");
        assert_eq!(out, "hello there");
    }

    #[test]
    fn cjk_mention_tokens_are_matched() {
        let llms = vec![llm("zh", "助手")];
        let matched = match_llms_from_mentions("@助手 你好", &[], &llms);
        assert_eq!(matched.len(), 1);
    }
}
