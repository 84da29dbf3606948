//! Wire protocol codec for the live session
//!
//! Serializes outbound setup and media-chunk envelopes and parses inbound
//! `serverContent` messages. Stateless; the session controller decides what
//! to do with the results.

use crate::error::Result;
use serde::Serialize;
use serde_json::json;

/// MIME type for outgoing microphone audio.
pub const AUDIO_MIME: &str = "audio/pcm";
/// MIME type for outgoing camera frames.
pub const IMAGE_MIME: &str = "image/jpeg";
/// MIME type the service uses for inline audio it returns.
pub const AUDIO_OUT_MIME: &str = "audio/pcm;rate=24000";

/// Generation configuration inside the setup envelope.
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
}

/// Session setup request.
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<serde_json::Value>,
}

/// Everything extracted from one inbound `serverContent` message.
///
/// All fields are optional and independent; an empty value is a valid parse
/// of a message that simply carries none of the content we route.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerContent {
    /// Transcription of the model's spoken output.
    pub transcript: Option<String>,
    /// Text parts of the model turn, in order.
    pub texts: Vec<String>,
    /// Base64-encoded 24 kHz PCM parts of the model turn, in order.
    pub audio_b64: Vec<String>,
}

impl ServerContent {
    pub fn is_empty(&self) -> bool {
        self.transcript.is_none() && self.texts.is_empty() && self.audio_b64.is_empty()
    }
}

/// Build the setup envelope sent immediately after connecting.
///
/// Muted sessions request text-only responses; unmuted sessions request
/// text plus audio and ask for output transcription.
pub fn encode_setup(model: &str, muted: bool) -> String {
    let modalities = if muted {
        vec!["TEXT".to_string()]
    } else {
        vec!["TEXT".to_string(), "AUDIO".to_string()]
    };

    let setup = Setup {
        model: model.to_string(),
        generation_config: GenerationConfig {
            response_modalities: modalities,
        },
        output_audio_transcription: (!muted).then(|| json!({})),
    };

    json!({ "setup": setup }).to_string()
}

/// Wrap one base64 media payload in a `realtime_input` envelope.
pub fn encode_media_chunk(b64_data: &str, mime_type: &str) -> String {
    json!({
        "realtime_input": {
            "media_chunks": [
                {
                    "mime_type": mime_type,
                    "data": b64_data,
                }
            ]
        }
    })
    .to_string()
}

/// Parse one inbound message.
///
/// Malformed JSON is an error for the caller to log and drop; a well-formed
/// message without any routable content yields an empty [`ServerContent`].
pub fn decode(raw: &str) -> Result<ServerContent> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    let mut content = ServerContent::default();

    let Some(server_content) = value.get("serverContent") else {
        return Ok(content);
    };

    if let Some(transcription) = server_content.get("outputTranscription") {
        if let Some(text) = transcription.get("text").and_then(|t| t.as_str()) {
            if !text.is_empty() {
                content.transcript = Some(text.to_string());
            }
        }
    }

    if let Some(parts) = server_content
        .get("modelTurn")
        .and_then(|turn| turn.get("parts"))
        .and_then(|p| p.as_array())
    {
        for part in parts {
            if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
                content.texts.push(text.to_string());
            }
            if let Some(inline_data) = part.get("inlineData") {
                let mime = inline_data.get("mimeType").and_then(|m| m.as_str());
                if mime == Some(AUDIO_OUT_MIME) {
                    if let Some(data) = inline_data.get("data").and_then(|d| d.as_str()) {
                        content.audio_b64.push(data.to_string());
                    }
                }
            }
        }
    }

    Ok(content)
}
