//! Feed snapshot exporters.

use sentinel_types::AgentActivityEvent;

/// Pretty-printed JSON array.
pub fn to_json(events: &[AgentActivityEvent]) -> String {
    serde_json::to_string_pretty(events).unwrap_or_else(|_| "[]".to_string())
}

/// Header row plus one line per event; metadata is flattened to a JSON
/// object string.
pub fn to_csv(events: &[AgentActivityEvent]) -> String {
    let mut out = String::from(
        "event_id,agent_id,activity_type,severity,title,description,occurred_at,metadata\n",
    );
    for event in events {
        let metadata = serde_json::to_string(&event.metadata).unwrap_or_else(|_| "{}".to_string());
        let row = [
            event.event_id.to_string(),
            event.agent_id.clone(),
            event.activity_type.as_str().to_string(),
            event.severity.as_str().to_string(),
            event.title.clone(),
            event.description.clone(),
            event.occurred_at.to_rfc3339(),
            metadata,
        ];
        let escaped: Vec<String> = row.iter().map(|field| csv_escape(field)).collect();
        out.push_str(&escaped.join(","));
        out.push('\n');
    }
    out
}

/// `<activities>` document with one `<activity>` element per event.
pub fn to_xml(events: &[AgentActivityEvent]) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<activities>\n");
    for event in events {
        out.push_str("  <activity>\n");
        push_element(&mut out, "event_id", &event.event_id.to_string());
        push_element(&mut out, "agent_id", &event.agent_id);
        push_element(&mut out, "activity_type", event.activity_type.as_str());
        push_element(&mut out, "severity", event.severity.as_str());
        push_element(&mut out, "title", &event.title);
        push_element(&mut out, "description", &event.description);
        push_element(&mut out, "occurred_at", &event.occurred_at.to_rfc3339());
        out.push_str("  </activity>\n");
    }
    out.push_str("</activities>\n");
    out
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn push_element(out: &mut String, name: &str, value: &str) {
    out.push_str("    <");
    out.push_str(name);
    out.push('>');
    out.push_str(&xml_escape(value));
    out.push_str("</");
    out.push_str(name);
    out.push_str(">\n");
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_types::activity::activity_events;

    #[test]
    fn csv_has_header_and_one_row_per_event() {
        let events = vec![
            activity_events::agent_started("agent-1", "compliance"),
            activity_events::agent_stopped("agent-1"),
        ];
        let csv = to_csv(&events);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("event_id,agent_id,activity_type"));
        assert!(lines[1].contains("agent_started"));
        assert!(lines[2].contains("agent_stopped"));
    }

    #[test]
    fn csv_escapes_embedded_commas_and_quotes() {
        let mut event = activity_events::agent_error("agent-1", "boom");
        event.description = "failed, with \"quotes\"".into();
        let csv = to_csv(&[event]);
        assert!(csv.contains("\"failed, with \"\"quotes\"\"\""));
    }

    #[test]
    fn xml_escapes_markup() {
        let mut event = activity_events::agent_error("agent-1", "x");
        event.title = "a < b & c".into();
        let xml = to_xml(&[event]);
        assert!(xml.contains("<title>a &lt; b &amp; c</title>"));
        assert!(xml.starts_with("<?xml"));
        assert!(xml.trim_end().ends_with("</activities>"));
    }

    #[test]
    fn json_round_trips() {
        let events = vec![activity_events::agent_started("agent-1", "compliance")];
        let json = to_json(&events);
        let parsed: Vec<AgentActivityEvent> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, events);
    }
}
