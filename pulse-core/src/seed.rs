//! Demo data: chats with back-dated message history.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::store::{ChatStore, MemoryChatStore, StoreError};

/// Display names used for generated senders.
pub const SENDERS: &[&str] = &[
    "Alice", "Bob", "Charlie", "Diana", "Eve", "Frank", "Grace", "Hank",
    "Ivy", "Jack", "Karen", "Leo", "Mona", "Nick", "Olivia", "Paul",
];

/// Message bodies used for generated traffic.
pub const BODIES: &[&str] = &[
    "Hey, has anyone looked at the latest changes?",
    "I just pushed a fix for the issue we discussed.",
    "Can we schedule a meeting to talk about this?",
    "The build is passing now after the patch.",
    "I think we should refactor this module.",
    "Great work on the last sprint!",
    "Has anyone tested this on production yet?",
    "I found a potential issue with the current approach.",
    "Let me check the logs and get back to you.",
    "The performance metrics look much better now.",
    "We need to update the documentation for this.",
    "I agree with the proposed solution.",
    "Can someone review my pull request?",
    "The deadline for this is end of next week.",
    "I will handle the deployment tomorrow morning.",
    "This looks good to me, shipping it.",
    "We might want to add more test coverage here.",
    "The client reported a new issue today.",
    "I have a question about the data model.",
    "Let us sync up after lunch.",
    "Just finished the code review, looks solid.",
    "We should add error handling for edge cases.",
    "The API response times improved significantly.",
    "I noticed a regression in the latest build.",
    "Can we pair program on this feature tomorrow?",
];

const CHAT_TOPICS: &[&str] = &[
    "Project Update", "Team Standup", "Design Review", "Bug Report",
    "Feature Request", "Code Review", "Sprint Planning", "Retro Notes",
    "Deployment", "Architecture", "Performance", "Security Audit",
    "Onboarding", "Release Notes", "Customer Feedback", "Data Migration",
    "API Changes", "Testing Strategy", "Documentation", "Infrastructure",
];

/// Chats created by a default seed.
pub const DEFAULT_CHAT_COUNT: usize = 200;
/// Messages per chat created by a default seed.
pub const DEFAULT_MESSAGES_PER_CHAT: usize = 100;

const ONE_MONTH_MS: i64 = 30 * 24 * 60 * 60 * 1000;

/// Pick a random sender name.
pub fn random_sender(rng: &mut impl Rng) -> &'static str {
    SENDERS.choose(rng).copied().unwrap_or("Anonymous")
}

/// Pick a random message body.
pub fn random_body(rng: &mut impl Rng) -> &'static str {
    BODIES.choose(rng).copied().unwrap_or("...")
}

/// Fill `store` with `chat_count` chats holding `messages_per_chat` messages
/// each, spread over the past month. Returns the created chat ids.
pub fn seed_store(
    store: &MemoryChatStore,
    chat_count: usize,
    messages_per_chat: usize,
) -> Result<Vec<i64>, StoreError> {
    let mut rng = rand::thread_rng();
    let now = chrono::Utc::now().timestamp_millis();
    let base = now - ONE_MONTH_MS;
    let mut ids = Vec::with_capacity(chat_count);

    for _ in 0..chat_count {
        let topic = CHAT_TOPICS.choose(&mut rng).copied().unwrap_or("Chat");
        let id = store.create_chat(format!("{topic} #{}", rng.gen_range(1..=999)))?;

        for j in 0..messages_per_chat {
            let spread = ONE_MONTH_MS * j as i64 / messages_per_chat.max(1) as i64;
            let ts = base + spread + rng.gen_range(0..60_000);
            store.insert_message_at(id, ts, random_sender(&mut rng), random_body(&mut rng))?;
        }

        // Leave roughly a third of the chats with unread history.
        if rng.gen_ratio(2, 3) {
            store.mark_as_read(id)?;
        }
        ids.push(id);
    }

    log::info!(
        "Seeded {chat_count} chats with {} messages",
        chat_count * messages_per_chat
    );
    Ok(ids)
}

/// Wipe `store` and seed it again from scratch.
pub fn reseed_store(
    store: &MemoryChatStore,
    chat_count: usize,
    messages_per_chat: usize,
) -> Result<Vec<i64>, StoreError> {
    store.clear()?;
    log::info!("Cleared chat store for reseed");
    seed_store(store, chat_count, messages_per_chat)
}
