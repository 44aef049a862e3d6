//! Text-to-speech via the Google Translate TTS endpoint.
//!
//! Nothing is downloaded: the backend builds the audio URL and returns it
//! inline for the client to fetch.

use async_trait::async_trait;
use serde_json::json;

use super::{unexpected_params, Backend, BackendError, BackendOutcome, Invocation};
use crate::job::{JobKind, JobParams};

const NORMAL_SPEED: &str = "1";
const SLOW_SPEED: &str = "0.24";

pub struct TtsBackend {
    host: String,
}

impl TtsBackend {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn audio_url(&self, text: &str, lang: &str, slow: bool) -> String {
        format!(
            "{}/translate_tts?ie=UTF-8&q={}&tl={}&total=1&idx=0&textlen={}&client=tw-ob&prev=input&ttsspeed={}",
            self.host,
            urlencoding::encode(text),
            urlencoding::encode(lang),
            text.chars().count(),
            if slow { SLOW_SPEED } else { NORMAL_SPEED },
        )
    }
}

#[async_trait]
impl Backend for TtsBackend {
    fn name(&self) -> &str {
        "google-tts"
    }

    fn kind(&self) -> JobKind {
        JobKind::TextToSpeech
    }

    async fn invoke(&self, invocation: &Invocation) -> Result<BackendOutcome, BackendError> {
        let JobParams::TextToSpeech { text, lang, slow } = &invocation.params else {
            return Err(unexpected_params(self.name(), &invocation.params));
        };
        invocation.cancel.check()?;

        Ok(BackendOutcome::Inline(json!({
            "audio_url": self.audio_url(text, lang, *slow),
            "lang": lang,
            "slow": slow,
        })))
    }
}
