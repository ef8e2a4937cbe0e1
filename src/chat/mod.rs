//! Chat announcements for completed plays.

mod notifier;

pub use notifier::{
    build_message, ChatClient, ChatMessage, ChatNotifier, GateStrategy, WebhookChatClient,
};
