//! Telegram relay bot: forwards text and transcribed voice messages to the
//! OpenAI chat-completion API and relays the replies.

pub mod audio;
pub mod bot;
pub mod config;
pub mod openai;
