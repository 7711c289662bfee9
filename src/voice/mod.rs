//! 语音选择管理器 — 目录缓存、单一激活语音、合成入口
//!
//! Voice selection manager. A narrower sibling of the dispatch router for
//! the voice capability: lists the remote voice catalog (falling back to the
//! last successful snapshot when the remote is down), enforces the
//! single-active-voice invariant, and synthesizes speech through the
//! dispatcher.

use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use base64::Engine as _;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::dispatch::Dispatcher;
use crate::error::ErrorContext;
use crate::loader::SafeResourceLoader;
use crate::normalize::voice::decode_voice_catalog;
use crate::registry::Capability;
use crate::types::chat::{CallClass, ChatRequest, GenerationParams};
use crate::types::message::Turn;
use crate::{Error, Result};

/// One entry of the voice catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceProfile {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
    /// At most one profile is active at a time; enforced by the manager,
    /// not by this type.
    #[serde(default)]
    pub active: bool,
}

/// Synthesized speech returned to the caller.
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub data: Vec<u8>,
    pub content_type: String,
}

pub struct VoiceSelectionManager {
    dispatcher: Arc<Dispatcher>,
    /// Last successfully fetched catalog (without active flags).
    catalog: ArcSwap<Vec<VoiceProfile>>,
    active: Mutex<Option<String>>,
}

impl VoiceSelectionManager {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            catalog: ArcSwap::from_pointee(Vec::new()),
            active: Mutex::new(None),
        }
    }

    /// Fetch the voice catalog. On remote failure the last successfully
    /// cached list is returned instead; never an empty list once one fetch
    /// has succeeded.
    pub async fn list_voices(&self, cancel: &CancellationToken) -> Result<Vec<VoiceProfile>> {
        match self.fetch_catalog(cancel).await {
            Ok(fresh) => {
                self.catalog.store(Arc::new(fresh.clone()));
                Ok(self.mark_active(fresh))
            }
            Err(e) => {
                let cached = self.catalog.load_full();
                if cached.is_empty() {
                    Err(e)
                } else {
                    warn!(error = %e, "voice catalog fetch failed, serving cached list");
                    Ok(self.mark_active(cached.as_ref().clone()))
                }
            }
        }
    }

    /// Make `id` the active voice, atomically deactivating the previous one.
    pub async fn select_voice(&self, id: &str, cancel: &CancellationToken) -> Result<()> {
        let voices = self.list_voices(cancel).await?;
        if !voices.iter().any(|v| v.id == id) {
            return Err(Error::configuration_with_context(
                format!("unknown voice '{}'", id),
                ErrorContext::new()
                    .with_capability(Capability::Voice.as_str())
                    .with_source("voice_selection"),
            ));
        }
        *self.active.lock().unwrap() = Some(id.to_string());
        Ok(())
    }

    pub fn active_voice_id(&self) -> Option<String> {
        self.active.lock().unwrap().clone()
    }

    /// Synthesize speech for `text` with the active voice (provider default
    /// when none is selected).
    pub async fn synthesize(&self, text: &str, cancel: &CancellationToken) -> Result<AudioClip> {
        let voice = self.active_voice_id();
        let request = ChatRequest::new(Capability::Voice, vec![Turn::user(text)]).with_params(
            GenerationParams {
                voice,
                ..Default::default()
            },
        );
        let response = self.dispatcher.dispatch(request, cancel).await?;
        let encoded = response.text.ok_or_else(|| {
            Error::parse_with_context(
                "synthesis response carried no audio content",
                ErrorContext::new().with_source("voice_selection"),
            )
        })?;
        let data = base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| {
                Error::parse_with_context(
                    format!("audio content is not valid base64: {}", e),
                    ErrorContext::new().with_source("voice_selection"),
                )
            })?;
        Ok(AudioClip {
            data,
            content_type: "audio/mpeg".into(),
        })
    }

    /// Preview audio for a cataloged voice, via the safe loader (placeholder
    /// bytes when the preview cannot be fetched).
    pub async fn preview(&self, loader: &SafeResourceLoader, id: &str) -> Option<Bytes> {
        let url = {
            let catalog = self.catalog.load();
            catalog.iter().find(|p| p.id == id)?.preview_url.clone()?
        };
        Some(loader.load(&url).await)
    }

    async fn fetch_catalog(&self, cancel: &CancellationToken) -> Result<Vec<VoiceProfile>> {
        let descriptor = self.dispatcher.registry().resolve(Capability::Voice)?;
        let transport = self.dispatcher.transport_for(&descriptor.name)?;
        let policy = self
            .dispatcher
            .policies
            .get(&CallClass::Interactive)
            .ok_or_else(|| Error::configuration("no retry policy compiled for call class"))?;
        let body = self
            .dispatcher
            .engine
            .execute("voice:catalog", policy, cancel, |_attempt| {
                let transport = Arc::clone(&transport);
                let path = descriptor.voices_path.clone();
                async move { transport.get_json(&path).await }
            })
            .await?;
        decode_voice_catalog(&body)
    }

    fn mark_active(&self, mut profiles: Vec<VoiceProfile>) -> Vec<VoiceProfile> {
        let active = self.active.lock().unwrap().clone();
        for profile in &mut profiles {
            profile.active = active.as_deref() == Some(profile.id.as_str());
        }
        profiles
    }
}
