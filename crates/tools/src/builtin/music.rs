//! Music Playback Tool
//!
//! Resolves a song from the local music directory and streams it through the
//! TTS orchestrator: a spoken announcement followed by the file itself. No
//! synthesis happens for the file unit.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;

use voxline_core::{ActionResponse, SessionContext};
use voxline_engine::{services, TtsOrchestrator};

use crate::registry::{SystemContext, SystemTool};
use crate::ToolError;

const AUDIO_EXTENSIONS: [&str; 4] = ["opus", "ogg", "mp3", "wav"];

pub struct PlayMusicTool {
    music_dir: PathBuf,
}

impl PlayMusicTool {
    pub fn new(music_dir: impl Into<PathBuf>) -> Self {
        Self {
            music_dir: music_dir.into(),
        }
    }

    fn is_audio(path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| AUDIO_EXTENSIONS.contains(&e.to_lowercase().as_str()))
            .unwrap_or(false)
    }

    /// Case-insensitive stem match; an empty query takes the first track.
    async fn find_track(&self, query: &str) -> Result<Option<PathBuf>, ToolError> {
        let mut entries = tokio::fs::read_dir(&self.music_dir)
            .await
            .map_err(|e| ToolError::execution("play_music", e))?;

        let query = query.to_lowercase();
        let mut first: Option<PathBuf> = None;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ToolError::execution("play_music", e))?
        {
            let path = entry.path();
            if !Self::is_audio(&path) {
                continue;
            }
            if first.is_none() {
                first = Some(path.clone());
            }
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_lowercase();
            if !query.is_empty() && stem.contains(&query) {
                return Ok(Some(path));
            }
        }

        Ok(if query.is_empty() { first } else { None })
    }
}

#[async_trait]
impl SystemTool for PlayMusicTool {
    fn name(&self) -> &str {
        "play_music"
    }

    fn description(&self) -> &str {
        "Play a song from the local music library. Use when the user asks for music."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "song_name": {
                    "type": "string",
                    "description": "Song name or keyword; empty picks any track",
                }
            },
        })
    }

    async fn invoke(&self, ctx: &SystemContext, args: Value) -> Result<ActionResponse, ToolError> {
        let query = args
            .get("song_name")
            .and_then(|s| s.as_str())
            .unwrap_or_default();

        let Some(track) = self.find_track(query).await? else {
            return Ok(ActionResponse::error(format!(
                "I couldn't find '{query}' in the music library."
            )));
        };

        let title = track
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("music")
            .replace(['_', '-'], " ");

        tracing::info!(
            session_id = %ctx.session_id,
            track = %track.display(),
            "playing music"
        );

        let orchestrator = ctx
            .container
            .resolve::<TtsOrchestrator>(services::TTS_ORCHESTRATOR, None)
            .map_err(|e| ToolError::execution("play_music", e))?;
        let context = ctx
            .container
            .resolve::<SessionContext>(services::SESSION_CONTEXT, Some(&ctx.session_id))
            .map_err(|e| ToolError::execution("play_music", e))?;

        // Inside a dialogue turn the bracket is already open; from the intent
        // path there is none yet, so open and close one around the track.
        let standalone = context.llm_finish_task();
        if standalone {
            context.set_sentence_id(uuid_simple());
            orchestrator
                .begin_utterance(&ctx.session_id)
                .await
                .map_err(|e| ToolError::execution("play_music", e))?;
        }

        orchestrator
            .add_text(&ctx.session_id, format!("Playing {title}."))
            .await
            .map_err(|e| ToolError::execution("play_music", e))?;
        orchestrator
            .play_file(&ctx.session_id, track)
            .await
            .map_err(|e| ToolError::execution("play_music", e))?;

        if standalone {
            orchestrator
                .end_utterance(&ctx.session_id)
                .await
                .map_err(|e| ToolError::execution("play_music", e))?;
        }

        Ok(ActionResponse::none())
    }
}

fn uuid_simple() -> String {
    format!("sentence-{}", uuid::Uuid::new_v4().simple())
}
