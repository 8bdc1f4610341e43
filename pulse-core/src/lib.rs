//! # pulse-core: chat data model and store gateway for Pulse
//!
//! Everything the live simulation layer needs from the outside world:
//!
//! ```text
//! ┌──────────────────┐  add_message / get_chat_by_id / get_chats
//! │ SimulationServer │ ─────────────────────────────────────────┐
//! │ (pulse-live)     │                                          │
//! └──────────────────┘                                          ▼
//!                                                   ┌────────────────────┐
//!                                                   │ ChatStore (trait)  │
//!                                                   │  MemoryChatStore   │
//!                                                   └─────────┬──────────┘
//!                                                             │ encrypt / decrypt
//!                                                             ▼
//!                                                   ┌────────────────────┐
//!                                                   │ SecurityService    │
//!                                                   └────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`model`]: `Chat` and `Message` records
//! - [`store`]: the gateway trait and the in-memory implementation
//! - [`security`]: body encryption seam, error sanitizing, log redaction
//! - [`seed`]: demo data for the desktop host

pub mod model;
pub mod store;
pub mod security;
pub mod seed;

pub use model::{Chat, Message};
pub use store::{ChatStore, MemoryChatStore, StoreError};
pub use security::{redact_for_log, sanitize_error, PassthroughSecurity, SecurityService};
pub use seed::{reseed_store, seed_store};
