//! HTTP chat API over the promptly completion stack.
//!
//! - `POST /api/conversation` answers a message, creating a chat when needed
//! - `GET /api/chats` lists chats, newest first
//! - `GET /api/chats/{id}` returns one chat with its entries

pub mod routes;
pub mod store;

pub use routes::{router, AppState};
pub use store::{ChatStore, InMemoryChatStore};
