//! Voice-synthesis codec. Synthesis responses carry base64 audio in the
//! canonical text slot (the [`crate::voice::VoiceSelectionManager`] decodes
//! it back to bytes); the voice catalog is a plain GET.

use serde_json::Value;

use super::{WireCodec, WireRequest};
use crate::error::ErrorContext;
use crate::registry::{ProviderDescriptor, ProviderKind};
use crate::types::chat::{ChatRequest, ChatResponse};
use crate::voice::VoiceProfile;
use crate::{Error, Result};

pub struct VoiceSynthesisCodec;

impl WireCodec for VoiceSynthesisCodec {
    fn kind(&self) -> ProviderKind {
        ProviderKind::VoiceSynthesis
    }

    fn encode(
        &self,
        request: &ChatRequest,
        descriptor: &ProviderDescriptor,
    ) -> Result<WireRequest> {
        let text = request.last_user_text().ok_or_else(|| {
            Error::configuration_with_context(
                "voice synthesis requires at least one user turn",
                ErrorContext::new()
                    .with_provider(&descriptor.name)
                    .with_source("wire_encode"),
            )
        })?;

        let mut body = serde_json::json!({
            "model_id": descriptor.model,
            "text": text,
        });
        if let Some(voice) = &request.params.voice {
            body["voice_id"] = Value::String(voice.clone());
        }
        Ok(WireRequest::post(descriptor.chat_path.clone(), body))
    }

    fn decode(&self, body: &Value) -> Result<ChatResponse> {
        if let Some(err) = super::detect_error_envelope(body) {
            return Err(err);
        }
        let audio = body
            .get("audio_content")
            .and_then(|a| a.as_str())
            .filter(|a| !a.is_empty())
            .map(String::from);
        super::finish_response(audio, Vec::new(), None)
    }
}

/// Parse the voice catalog response. Profiles come back inactive; the
/// selection manager applies the active flag.
pub fn decode_voice_catalog(body: &Value) -> Result<Vec<VoiceProfile>> {
    let voices = body
        .get("voices")
        .and_then(|v| v.as_array())
        .ok_or_else(|| {
            Error::parse_with_context(
                "voice catalog response missing 'voices' array",
                ErrorContext::new().with_source("wire_decode"),
            )
        })?;

    Ok(voices
        .iter()
        .filter_map(|voice| {
            let id = voice.get("voice_id").and_then(|v| v.as_str())?;
            let name = voice
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or(id)
                .to_string();
            Some(VoiceProfile {
                id: id.to_string(),
                name,
                preview_url: voice
                    .get("preview_url")
                    .and_then(|v| v.as_str())
                    .map(String::from),
                active: false,
            })
        })
        .collect())
}
