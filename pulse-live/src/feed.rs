//! Client-side chat feed: the local copy of chats and loaded messages that
//! incoming `new-message` events are folded into.

use std::collections::{HashMap, HashSet};

use pulse_core::{Chat, Message};

/// Default page size for chat and message loads.
pub const PAGE_SIZE: usize = 50;

/// Loaded messages of one chat, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatMessages {
    pub items: Vec<Message>,
    /// Last page was full, so older messages may exist
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatFeed {
    chats: Vec<Chat>,
    selected: Option<i64>,
    has_more: bool,
    messages: HashMap<i64, ChatMessages>,
}

impl Default for ChatFeed {
    fn default() -> Self {
        Self {
            chats: Vec::new(),
            selected: None,
            has_more: true,
            messages: HashMap::new(),
        }
    }
}

impl ChatFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chats ordered most-recent first.
    pub fn chats(&self) -> &[Chat] {
        &self.chats
    }

    pub fn chat(&self, id: i64) -> Option<&Chat> {
        self.chats.iter().find(|chat| chat.id == id)
    }

    pub fn selected(&self) -> Option<i64> {
        self.selected
    }

    pub fn has_more_chats(&self) -> bool {
        self.has_more
    }

    /// `None` until a page for this chat has been loaded.
    pub fn messages(&self, chat_id: i64) -> Option<&ChatMessages> {
        self.messages.get(&chat_id)
    }

    /// Offset 0 replaces the list; later pages append what is not already there.
    pub fn load_chats(&mut self, chats: Vec<Chat>, offset: usize, limit: usize) {
        self.has_more = chats.len() >= limit;
        if offset == 0 {
            self.chats = chats;
        } else {
            append_unique(&mut self.chats, chats, |chat| chat.id);
        }
    }

    pub fn load_messages(&mut self, chat_id: i64, messages: Vec<Message>, offset: usize, limit: usize) {
        let entry = self.messages.entry(chat_id).or_default();
        entry.has_more = messages.len() >= limit;
        if offset == 0 {
            entry.items = messages;
        } else {
            append_unique(&mut entry.items, messages, |message| message.id);
        }
    }

    pub fn select_chat(&mut self, chat_id: Option<i64>) {
        self.selected = chat_id;
    }

    /// Prepend to the chat's messages, only if that chat has been loaded.
    pub fn message_received(&mut self, message: Message) {
        if let Some(entry) = self.messages.get_mut(&message.chat_id) {
            entry.items.insert(0, message);
        }
    }

    /// Move the chat to reflect a new message, creating it if unseen.
    pub fn chat_updated_by_message(&mut self, chat_id: i64, message: &Message, chat_title: &str) {
        let selected = self.selected == Some(chat_id);
        match self.chats.iter_mut().find(|chat| chat.id == chat_id) {
            Some(chat) => {
                chat.last_message_at = message.ts;
                if !selected {
                    chat.unread_count += 1;
                }
                self.chats
                    .sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
            }
            None => {
                self.chats.insert(
                    0,
                    Chat {
                        id: chat_id,
                        title: chat_title.to_string(),
                        last_message_at: message.ts,
                        unread_count: if selected { 0 } else { 1 },
                    },
                );
            }
        }
    }

    pub fn mark_read(&mut self, chat_id: i64) {
        if let Some(chat) = self.chats.iter_mut().find(|chat| chat.id == chat_id) {
            chat.unread_count = 0;
        }
    }
}

fn append_unique<T>(existing: &mut Vec<T>, incoming: Vec<T>, key: impl Fn(&T) -> i64) {
    let seen: HashSet<i64> = existing.iter().map(&key).collect();
    existing.extend(incoming.into_iter().filter(|item| !seen.contains(&key(item))));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat(id: i64, last_message_at: i64) -> Chat {
        Chat {
            id,
            title: format!("Chat {id}"),
            last_message_at,
            unread_count: 0,
        }
    }

    fn message(id: i64, chat_id: i64, ts: i64) -> Message {
        Message {
            id,
            chat_id,
            ts,
            sender: "Ivy".to_string(),
            body: "Let me check the logs and get back to you.".to_string(),
        }
    }

    #[test]
    fn test_load_chats_replace_then_append_dedup() {
        let mut feed = ChatFeed::new();
        feed.load_chats(vec![chat(1, 300), chat(2, 200)], 0, 2);
        assert!(feed.has_more_chats());

        feed.load_chats(vec![chat(2, 200), chat(3, 100)], 2, 50);
        let ids: Vec<i64> = feed.chats().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(!feed.has_more_chats());

        feed.load_chats(vec![chat(9, 999)], 0, 50);
        assert_eq!(feed.chats().len(), 1);
    }

    #[test]
    fn test_message_received_only_for_loaded_chat() {
        let mut feed = ChatFeed::new();
        feed.message_received(message(1, 5, 10));
        assert!(feed.messages(5).is_none());

        feed.load_messages(5, vec![message(1, 5, 10)], 0, PAGE_SIZE);
        feed.message_received(message(2, 5, 20));
        let ids: Vec<i64> = feed.messages(5).unwrap().items.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn test_load_messages_pagination_dedup() {
        let mut feed = ChatFeed::new();
        feed.load_messages(4, vec![message(3, 4, 30), message(2, 4, 20)], 0, 2);
        assert!(feed.messages(4).unwrap().has_more);
        feed.load_messages(4, vec![message(2, 4, 20), message(1, 4, 10)], 2, 2);
        let ids: Vec<i64> = feed.messages(4).unwrap().items.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[test]
    fn test_chat_updated_existing_resorts_and_counts_unread() {
        let mut feed = ChatFeed::new();
        feed.load_chats(vec![chat(1, 300), chat(2, 200)], 0, PAGE_SIZE);

        feed.chat_updated_by_message(2, &message(10, 2, 400), "Chat 2");
        assert_eq!(feed.chats()[0].id, 2);
        assert_eq!(feed.chats()[0].last_message_at, 400);
        assert_eq!(feed.chats()[0].unread_count, 1);
    }

    #[test]
    fn test_chat_updated_selected_stays_read() {
        let mut feed = ChatFeed::new();
        feed.load_chats(vec![chat(1, 300)], 0, PAGE_SIZE);
        feed.select_chat(Some(1));
        feed.chat_updated_by_message(1, &message(10, 1, 500), "Chat 1");
        assert_eq!(feed.chat(1).unwrap().unread_count, 0);

        feed.chat_updated_by_message(7, &message(11, 7, 600), "Retro Notes #7");
        let created = feed.chat(7).unwrap();
        assert_eq!(created.title, "Retro Notes #7");
        assert_eq!(created.unread_count, 1);
        assert_eq!(feed.chats()[0].id, 7);
    }

    #[test]
    fn test_unknown_selected_chat_prepended_read() {
        let mut feed = ChatFeed::new();
        feed.select_chat(Some(8));
        feed.chat_updated_by_message(8, &message(1, 8, 100), "Deployment #8");
        assert_eq!(feed.chat(8).unwrap().unread_count, 0);
    }

    #[test]
    fn test_mark_read() {
        let mut feed = ChatFeed::new();
        feed.load_chats(vec![chat(1, 300)], 0, PAGE_SIZE);
        feed.chat_updated_by_message(1, &message(1, 1, 400), "Chat 1");
        feed.chat_updated_by_message(1, &message(2, 1, 500), "Chat 1");
        assert_eq!(feed.chat(1).unwrap().unread_count, 2);
        feed.mark_read(1);
        assert_eq!(feed.chat(1).unwrap().unread_count, 0);
        feed.mark_read(42);
    }
}
