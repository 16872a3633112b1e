//! Voice message audio handling.
//!
//! Telegram delivers voice notes as OGG Opus; the transcription endpoint
//! wants plain WAV. Conversion shells out to ffmpeg.

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::debug;

/// Scratch directory for one voice message, holding the downloaded OGG
/// and its WAV conversion.
pub struct VoiceWorkspace {
    pub dir: PathBuf,
    pub input_ogg: PathBuf,
    pub output_wav: PathBuf,
}

impl VoiceWorkspace {
    /// Create a fresh scratch directory under the system temp dir. Message
    /// IDs are only unique within a chat, so the directory is keyed by both
    /// to keep concurrent voice messages from sharing files.
    pub fn create(chat_id: i64, message_id: i32) -> Result<Self, String> {
        let dir = std::env::temp_dir().join(format!(
            "parley-voice-{}-{}-{}",
            std::process::id(),
            chat_id,
            message_id
        ));
        std::fs::create_dir_all(&dir)
            .map_err(|e| format!("Failed to create scratch dir: {e}"))?;

        Ok(Self {
            input_ogg: dir.join("input.ogg"),
            output_wav: dir.join("output.wav"),
            dir,
        })
    }

    /// Best-effort removal of the scratch files and directory.
    pub fn cleanup(&self) {
        let _ = std::fs::remove_file(&self.input_ogg);
        let _ = std::fs::remove_file(&self.output_wav);
        let _ = std::fs::remove_dir(&self.dir);
    }
}

/// Convert an OGG Opus file to 16KHz mono 16-bit PCM WAV using ffmpeg.
pub async fn convert_ogg_to_wav(input: &Path, output: &Path) -> Result<(), String> {
    let input_str = input.to_str().ok_or("Invalid input path")?;
    let output_str = output.to_str().ok_or("Invalid output path")?;

    let result = Command::new("ffmpeg")
        .args([
            "-i",
            input_str,
            "-ar",
            "16000", // 16KHz sample rate
            "-ac",
            "1", // Mono
            "-acodec",
            "pcm_s16le",
            "-y", // Overwrite
            output_str,
        ])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .output()
        .await
        .map_err(|e| format!("Failed to run ffmpeg: {e}"))?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        return Err(format!("ffmpeg failed: {}", stderr));
    }

    debug!("Converted {} to {}", input.display(), output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_creates_and_cleans_up() {
        let ws = VoiceWorkspace::create(100, 4242).expect("create workspace");
        assert!(ws.dir.exists());
        assert_eq!(ws.input_ogg.file_name().unwrap(), "input.ogg");
        assert_eq!(ws.output_wav.file_name().unwrap(), "output.wav");

        std::fs::write(&ws.input_ogg, b"ogg").unwrap();
        std::fs::write(&ws.output_wav, b"wav").unwrap();
        ws.cleanup();
        assert!(!ws.input_ogg.exists());
        assert!(!ws.output_wav.exists());
        assert!(!ws.dir.exists());
    }

    #[test]
    fn test_cleanup_tolerates_missing_files() {
        let ws = VoiceWorkspace::create(100, 4243).expect("create workspace");
        ws.cleanup();
        ws.cleanup();
        assert!(!ws.dir.exists());
    }

    #[test]
    fn test_workspaces_are_distinct_per_chat() {
        // Same message id arriving from two chats, as Telegram allows
        let a = VoiceWorkspace::create(111, 7).expect("create workspace a");
        let b = VoiceWorkspace::create(-100111, 7).expect("create workspace b");
        assert_ne!(a.dir, b.dir);

        std::fs::write(&a.input_ogg, b"from chat a").unwrap();
        std::fs::write(&b.input_ogg, b"from chat b").unwrap();
        a.cleanup();
        assert_eq!(std::fs::read(&b.input_ogg).unwrap(), b"from chat b");
        b.cleanup();
        assert!(!b.dir.exists());
    }
}
