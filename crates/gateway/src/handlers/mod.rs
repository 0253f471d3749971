pub mod chat;
pub mod embeds;
pub mod settings;
pub mod tasks;
