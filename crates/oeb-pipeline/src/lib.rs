// SPDX-License-Identifier: MIT OR Apache-2.0
//! Turns raw hook payloads keyed by a kebab-case URL segment into
//! canonical [`Envelope`]s.
//!
//! Three steps, in order: the stop-recursion guard, type mapping, then
//! field normalization/truncation. See [`enrich`].

use oeb_core::{Envelope, EventContext, EnvelopeError, create_event};
use serde_json::{Value, json};

/// Any serialized `*Preview` field longer than this is truncated.
const PREVIEW_MAX_LEN: usize = 2000;

/// Outcome of running the enrichment pipeline on an incoming hook payload.
#[derive(Debug)]
pub enum EnrichOutcome {
    /// The stop-recursion guard fired; nothing was stored or published.
    Skipped {
        /// Machine-readable reason, always `"stop_hook_active"` today.
        reason: &'static str,
    },
    /// A canonical envelope was produced and is ready for the store.
    Accepted(Box<Envelope>),
}

/// Run the enrichment pipeline for a hook named `hook_name` (the kebab-case
/// URL segment from `POST /events/:name`) carrying `payload`.
///
/// `payload` must already be known to be a JSON object; this is enforced by
/// the server before enrichment runs.
pub fn enrich(
    hook_name: &str,
    payload: &Value,
    context: &EventContext,
) -> Result<EnrichOutcome, EnvelopeError> {
    if hook_name == "stop" && payload.get("stop_hook_active") == Some(&Value::Bool(true)) {
        return Ok(EnrichOutcome::Skipped {
            reason: "stop_hook_active",
        });
    }

    let canonical = canonical_type(hook_name);
    let data = normalize(hook_name, &canonical, payload);

    let app = non_empty_str(payload, "app").unwrap_or(&context.app).to_string();
    let app_root = non_empty_str(payload, "cwd")
        .unwrap_or(&context.app_root)
        .to_string();

    let hook_context = EventContext {
        app,
        app_root,
        source: context.source,
        correlation_id: context.correlation_id.clone(),
    };

    create_event(canonical, data, &hook_context).map(|e| EnrichOutcome::Accepted(Box::new(e)))
}

/// Map a kebab-case hook name to its canonical dot-qualified type.
///
/// Known names map via the table below; anything else falls through to
/// `hook.<snake_case>` — this is intentional forward compatibility, not a
/// closed allow-list. `subagent_start`, `notification`,
/// `user_prompt_submit`, and any future hook name all take this path.
pub fn canonical_type(hook_name: &str) -> String {
    match hook_name {
        "session-start" => "hook.session_start".to_string(),
        "pre-tool-use" => "hook.pre_tool_use".to_string(),
        "post-tool-use" => "hook.post_tool_use".to_string(),
        "post-tool-use-failure" => "hook.post_tool_use_failure".to_string(),
        "stop" => "hook.stop".to_string(),
        other => format!("hook.{}", kebab_to_snake(other)),
    }
}

fn kebab_to_snake(s: &str) -> String {
    s.replace('-', "_")
}

fn non_empty_str<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    payload.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn normalize(hook_name: &str, canonical: &str, payload: &Value) -> Value {
    let hook_event = kebab_to_snake(hook_name);
    let mut data = serde_json::Map::new();
    data.insert("hookEvent".into(), json!(hook_event));

    if let Some(v) = payload.get("session_id") {
        data.insert("sessionId".into(), v.clone());
    }

    match canonical {
        "hook.session_start" => {
            copy_if_present(payload, "source", &mut data, "source");
            copy_if_present(payload, "model", &mut data, "model");
            copy_if_present(payload, "agent_type", &mut data, "agentType");
        }
        "hook.pre_tool_use" | "hook.post_tool_use" | "hook.post_tool_use_failure" => {
            copy_if_present(payload, "tool_name", &mut data, "toolName");
            copy_if_present(payload, "tool_use_id", &mut data, "toolUseId");
            copy_if_present(payload, "permission_mode", &mut data, "permissionMode");
            if let Some(input) = payload.get("tool_input") {
                data.insert("toolInputPreview".into(), json!(truncated(input)));
            }
            if let Some(result) = payload.get("tool_result") {
                data.insert("toolResultPreview".into(), json!(truncated(result)));
            }
        }
        "hook.stop" => {
            copy_if_present(payload, "transcript_path", &mut data, "transcriptPath");
        }
        _ => {
            // Unrouted hook name: carry the payload through unmodified
            // (still truncating any *_preview-shaped field) rather than
            // dropping data the consumer might still want.
            if let Some(obj) = payload.as_object() {
                for (k, v) in obj {
                    if k == "stop_hook_active" || k == "session_id" {
                        continue;
                    }
                    data.insert(to_camel_case(k), v.clone());
                }
            }
        }
    }

    Value::Object(data)
}

fn copy_if_present(payload: &Value, src_key: &str, out: &mut serde_json::Map<String, Value>, dst_key: &str) {
    if let Some(v) = payload.get(src_key) {
        out.insert(dst_key.to_string(), v.clone());
    }
}

/// Serialize `value` to JSON and truncate to [`PREVIEW_MAX_LEN`] characters
/// plus a literal `"..."` suffix if it would otherwise exceed that length.
fn truncated(value: &Value) -> String {
    let serialized = value.to_string();
    if serialized.chars().count() > PREVIEW_MAX_LEN {
        let prefix: String = serialized.chars().take(PREVIEW_MAX_LEN).collect();
        format!("{prefix}...")
    } else {
        serialized
    }
}

fn to_camel_case(snake: &str) -> String {
    let mut out = String::with_capacity(snake.len());
    let mut upper_next = false;
    for ch in snake.chars() {
        if ch == '_' {
            upper_next = true;
        } else if upper_next {
            out.extend(ch.to_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use oeb_core::EventSource;

    fn ctx() -> EventContext {
        EventContext {
            app: "oeb".into(),
            app_root: "/default".into(),
            source: EventSource::Hook,
            correlation_id: None,
        }
    }

    #[test]
    fn maps_known_hook_names_to_canonical_types() {
        assert_eq!(canonical_type("session-start"), "hook.session_start");
        assert_eq!(canonical_type("pre-tool-use"), "hook.pre_tool_use");
        assert_eq!(canonical_type("post-tool-use"), "hook.post_tool_use");
        assert_eq!(
            canonical_type("post-tool-use-failure"),
            "hook.post_tool_use_failure"
        );
        assert_eq!(canonical_type("stop"), "hook.stop");
    }

    #[test]
    fn unknown_hook_names_fall_through_to_hook_snake_case() {
        assert_eq!(canonical_type("subagent-start"), "hook.subagent_start");
        assert_eq!(canonical_type("notification"), "hook.notification");
        assert_eq!(
            canonical_type("user-prompt-submit"),
            "hook.user_prompt_submit"
        );
    }

    #[test]
    fn stop_with_recursion_flag_is_skipped() {
        let payload = json!({"stop_hook_active": true});
        let outcome = enrich("stop", &payload, &ctx()).unwrap();
        assert!(matches!(outcome, EnrichOutcome::Skipped { reason } if reason == "stop_hook_active"));
    }

    #[test]
    fn stop_without_recursion_flag_is_accepted() {
        let payload = json!({"transcript_path": "/tmp/t.json"});
        let outcome = enrich("stop", &payload, &ctx()).unwrap();
        assert!(matches!(outcome, EnrichOutcome::Accepted(_)));
    }

    #[test]
    fn session_start_normalizes_fields_and_scopes_app_root() {
        let payload = json!({"session_id": "S", "cwd": "/p", "model": "m"});
        let outcome = enrich("session-start", &payload, &ctx()).unwrap();
        let EnrichOutcome::Accepted(env) = outcome else {
            panic!("expected Accepted");
        };
        assert_eq!(env.app_root, "/p");
        assert_eq!(env.source, EventSource::Hook);
        assert_eq!(env.data["sessionId"], json!("S"));
        assert_eq!(env.data["model"], json!("m"));
        assert_eq!(env.data["hookEvent"], json!("session_start"));
    }

    #[test]
    fn long_tool_input_is_truncated_with_ellipsis() {
        let long = "x".repeat(3000);
        let payload = json!({"tool_input": long});
        let outcome = enrich("pre-tool-use", &payload, &ctx()).unwrap();
        let EnrichOutcome::Accepted(env) = outcome else {
            panic!("expected Accepted");
        };
        let preview = env.data["toolInputPreview"].as_str().unwrap();
        assert_eq!(preview.len(), PREVIEW_MAX_LEN + 3);
        assert!(preview.ends_with("..."));
    }

    #[test]
    fn short_tool_input_is_not_truncated() {
        let payload = json!({"tool_input": "short"});
        let outcome = enrich("pre-tool-use", &payload, &ctx()).unwrap();
        let EnrichOutcome::Accepted(env) = outcome else {
            panic!("expected Accepted");
        };
        // `tool_input` is serialized to JSON, so a string value keeps its quotes.
        assert_eq!(env.data["toolInputPreview"], json!("\"short\""));
    }

    #[test]
    fn defaults_app_root_to_context_when_cwd_absent() {
        let payload = json!({});
        let outcome = enrich("stop", &payload, &ctx()).unwrap();
        let EnrichOutcome::Accepted(env) = outcome else {
            panic!("expected Accepted");
        };
        assert_eq!(env.app_root, "/default");
    }

    #[test]
    fn unrouted_hook_still_produces_a_storable_envelope() {
        let payload = json!({"foo_bar": "baz"});
        let outcome = enrich("subagent-start", &payload, &ctx()).unwrap();
        let EnrichOutcome::Accepted(env) = outcome else {
            panic!("expected Accepted");
        };
        assert_eq!(env.event_type, "hook.subagent_start");
        assert_eq!(env.data["fooBar"], json!("baz"));
    }
}
