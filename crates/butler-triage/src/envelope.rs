use butler_schemas::IngestEnvelope;

/// The slice of an ingest envelope triage rules actually look at. Built
/// with safe defaults for every field — an adapter that can't throw, since
/// a malformed upstream payload must never block pre-classification
/// (§4.G "Envelope adapter").
#[derive(Debug, Clone, Default)]
pub struct TriageEnvelope {
    pub sender_address: String,
    pub source_channel: String,
    pub headers: Vec<(String, String)>,
    pub mime_types: Vec<String>,
    pub thread_id: Option<String>,
}

/// `make_triage_envelope_from_ingest` (§4.G).
pub fn make_triage_envelope_from_ingest(env: &IngestEnvelope) -> TriageEnvelope {
    let sender_address = env.sender.identity.to_lowercase();
    let source_channel = env.source.channel.clone();
    let thread_id = env.event.external_thread_id.clone();

    let headers = extract_headers(&env.payload.raw);

    let mut mime_types: Vec<String> = env
        .payload
        .raw
        .get("mime_parts")
        .and_then(|v| v.as_array())
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    if let Some(attachments) = &env.payload.attachments {
        for att in attachments {
            if let Some(media_type) = att.get("media_type").and_then(|v| v.as_str()) {
                mime_types.push(media_type.to_string());
            }
        }
    }

    TriageEnvelope {
        sender_address,
        source_channel,
        headers,
        mime_types,
        thread_id,
    }
}

fn extract_headers(raw: &serde_json::Value) -> Vec<(String, String)> {
    raw.get("headers")
        .and_then(|v| v.as_object())
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}
