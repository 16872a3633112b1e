//! Telegram update handlers.

use std::sync::Arc;

use teloxide::dispatching::UpdateHandler;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tracing::{error, info};

use crate::audio;
use crate::config::Config;
use crate::openai::{self, Model, Role};

/// System persona prepended to transcribed voice messages.
const VOICE_PERSONA: &str = "You are a helpful assistant.";

const GREETING: &str = "Hello! I am an AI assistant. How can I help you today?";
const GREETING_FOLLOW_UP: &str =
    "Please type your message below and I will respond to you as soon as possible.";
const TEST_ACK: &str = "Testing connection...";
const VOICE_CONVERSION_FAILED_REPLY: &str =
    "Sorry, I couldn't process your voice message due to a technical issue.";
const VOICE_FAILURE_REPLY: &str =
    "An unexpected error occurred while processing your voice message.";

/// Shared state for all handlers.
pub struct BotState {
    pub openai: openai::Client,
}

impl BotState {
    pub fn new(config: &Config) -> Self {
        Self {
            openai: openai::Client::new(config.openai_api_key.clone()),
        }
    }
}

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase")]
pub enum Command {
    #[command(description = "Greet and explain how to use the bot.")]
    Start,
    #[command(description = "Check the connection to Telegram.")]
    Test,
}

/// Build the update handler tree: commands first, then voice messages,
/// then plain text. Unknown commands match no branch and are ignored.
pub fn schema() -> UpdateHandler<teloxide::RequestError> {
    Update::filter_message()
        .branch(
            dptree::entry()
                .filter_command::<Command>()
                .endpoint(handle_command),
        )
        .branch(
            dptree::filter(|msg: Message| msg.voice().is_some()).endpoint(handle_voice),
        )
        .branch(dptree::filter(|msg: Message| is_plain_text(&msg)).endpoint(handle_text))
}

fn is_plain_text(msg: &Message) -> bool {
    msg.text().is_some_and(is_non_command_text)
}

fn is_non_command_text(text: &str) -> bool {
    !text.starts_with('/')
}

async fn handle_command(bot: Bot, msg: Message, cmd: Command) -> ResponseResult<()> {
    match cmd {
        Command::Start => {
            info!("Start command from chat {}", msg.chat.id);
            bot.send_message(msg.chat.id, GREETING).await?;
            bot.send_message(msg.chat.id, GREETING_FOLLOW_UP).await?;
        }
        Command::Test => {
            info!("Test command from chat {}", msg.chat.id);
            if let Err(e) = run_connection_test(&bot, msg.chat.id).await {
                error!("Connection test failed: {e}");
                bot.send_message(msg.chat.id, connection_failure_reply(&e))
                    .await?;
            }
        }
    }
    Ok(())
}

/// Acknowledge, look up the bot's own identity, and report the username.
/// Any failure falls through to the caller so the user still gets a
/// final failure message.
async fn run_connection_test(bot: &Bot, chat_id: ChatId) -> Result<(), teloxide::RequestError> {
    bot.send_message(chat_id, TEST_ACK).await?;
    let me = bot.get_me().await?;
    bot.send_message(chat_id, connection_success_reply(me.username()))
        .await?;
    Ok(())
}

async fn handle_text(bot: Bot, msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };

    let preview: String = text.chars().take(100).collect();
    info!("📨 Text from chat {}: \"{preview}\"", msg.chat.id);

    let messages = [openai::Message {
        role: Role::User,
        content: text.to_string(),
    }];

    match state.openai.chat_completion(Model::Gpt35Turbo, &messages).await {
        Ok(reply) => {
            // A failed reply send gets the same error report as a failed completion
            if let Err(e) = bot.send_message(msg.chat.id, reply).await {
                error!("Failed to send reply: {e}");
                bot.send_message(msg.chat.id, completion_error_reply(&e))
                    .await?;
            }
        }
        Err(e) => {
            error!("Chat completion failed: {e}");
            bot.send_message(msg.chat.id, completion_error_reply(&e))
                .await?;
        }
    }

    Ok(())
}

async fn handle_voice(bot: Bot, msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    if let Err(e) = process_voice(&bot, &msg, &state).await {
        error!("Voice message handling failed: {e}");
        bot.send_message(msg.chat.id, VOICE_FAILURE_REPLY).await?;
    }
    Ok(())
}

/// The voice pipeline: download, transcode, transcribe, complete, reply.
/// Each step hard-depends on the previous one. A transcode failure is
/// reported to the user here and ends the pipeline; everything else
/// bubbles up to `handle_voice`'s catch-all reply.
async fn process_voice(bot: &Bot, msg: &Message, state: &BotState) -> Result<(), String> {
    let Some(voice) = msg.voice() else {
        return Ok(());
    };

    info!("🎤 Voice message from chat {} ({} bytes)", msg.chat.id, voice.file.size);

    let workspace = audio::VoiceWorkspace::create(msg.chat.id.0, msg.id.0)?;

    let file = bot
        .get_file(voice.file.id.clone())
        .await
        .map_err(|e| format!("Failed to get voice file: {e}"))?;
    let mut ogg_data = Vec::new();
    bot.download_file(&file.path, &mut ogg_data)
        .await
        .map_err(|e| format!("Failed to download voice file: {e}"))?;
    std::fs::write(&workspace.input_ogg, &ogg_data)
        .map_err(|e| format!("Failed to write temp input: {e}"))?;

    if let Err(e) = audio::convert_ogg_to_wav(&workspace.input_ogg, &workspace.output_wav).await {
        // The scratch files are left behind on this path
        error!("Failed to convert OGG to WAV: {e}");
        bot.send_message(msg.chat.id, VOICE_CONVERSION_FAILED_REPLY)
            .await
            .map_err(|e| format!("Failed to send conversion error reply: {e}"))?;
        return Ok(());
    }

    let wav_data = std::fs::read(&workspace.output_wav)
        .map_err(|e| format!("Failed to read converted audio: {e}"))?;
    let transcript = state
        .openai
        .transcribe(wav_data)
        .await
        .map_err(|e| format!("Transcription failed: {e}"))?;

    let preview: String = transcript.chars().take(100).collect();
    info!("Transcribed: \"{preview}\"");

    // Scratch files are only removed once transcription has succeeded
    workspace.cleanup();

    let reply = state
        .openai
        .chat_completion(Model::Gpt35Turbo, &voice_completion_messages(&transcript))
        .await
        .map_err(|e| format!("Chat completion failed: {e}"))?;

    bot.send_message(msg.chat.id, reply.as_str())
        .await
        .map_err(|e| format!("Failed to send reply: {e}"))?;

    log_conversation(&transcript, &reply);

    Ok(())
}

/// Completion request for a transcribed voice message: the fixed persona
/// followed by the transcript as the user turn.
fn voice_completion_messages(transcript: &str) -> Vec<openai::Message> {
    vec![
        openai::Message {
            role: Role::System,
            content: VOICE_PERSONA.to_string(),
        },
        openai::Message {
            role: Role::User,
            content: transcript.to_string(),
        },
    ]
}

fn completion_error_reply(e: impl std::fmt::Display) -> String {
    format!("An error occurred: {e}")
}

fn connection_success_reply(username: &str) -> String {
    format!("Connected successfully. Bot name: {username}")
}

fn connection_failure_reply(e: impl std::fmt::Display) -> String {
    format!("Connection test failed: {e}")
}

/// Placeholder for conversation history; currently just logs the exchange.
fn log_conversation(user_message: &str, bot_response: &str) {
    info!("User: {user_message}");
    info!("Bot: {bot_response}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voice_completion_messages_shape() {
        let messages = voice_completion_messages("turn on the lights");
        assert_eq!(messages.len(), 2);
        assert!(matches!(messages[0].role, Role::System));
        assert_eq!(messages[0].content, "You are a helpful assistant.");
        assert!(matches!(messages[1].role, Role::User));
        assert_eq!(messages[1].content, "turn on the lights");
    }

    #[test]
    fn test_plain_text_excludes_commands() {
        assert!(is_non_command_text("hello"));
        assert!(is_non_command_text("what / how"));
        assert!(!is_non_command_text("/start"));
        assert!(!is_non_command_text("/unknowncommand"));
    }

    #[test]
    fn test_commands_parse_lowercase() {
        assert!(matches!(Command::parse("/start", "parley_bot"), Ok(Command::Start)));
        assert!(matches!(Command::parse("/test", "parley_bot"), Ok(Command::Test)));
        assert!(Command::parse("/unknowncommand", "parley_bot").is_err());
    }

    #[test]
    fn test_reply_strings_are_fixed() {
        assert_eq!(GREETING, "Hello! I am an AI assistant. How can I help you today?");
        assert_eq!(
            GREETING_FOLLOW_UP,
            "Please type your message below and I will respond to you as soon as possible."
        );
        assert_eq!(TEST_ACK, "Testing connection...");
        assert_eq!(
            VOICE_CONVERSION_FAILED_REPLY,
            "Sorry, I couldn't process your voice message due to a technical issue."
        );
        assert_eq!(
            VOICE_FAILURE_REPLY,
            "An unexpected error occurred while processing your voice message."
        );
    }

    #[test]
    fn test_completion_error_reply_includes_error_text() {
        let e = openai::Error::Api("500 Internal Server Error: boom".into());
        assert_eq!(
            completion_error_reply(&e),
            "An error occurred: API error: 500 Internal Server Error: boom"
        );
    }

    #[test]
    fn test_connection_replies() {
        assert_eq!(
            connection_success_reply("parley_bot"),
            "Connected successfully. Bot name: parley_bot"
        );
        assert_eq!(
            connection_failure_reply("api timeout"),
            "Connection test failed: api timeout"
        );
    }
}
