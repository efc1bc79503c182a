//! Domain events and the notifications they produce.
//!
//! Services describe what happened as an [`Event`]; the event knows who should
//! hear about it and how to phrase it. The resulting [`Notification`] is
//! written by the store inside the same transaction as the change itself.

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

use crate::models::{Notification, NotificationType, User};

/// Where the friend request inbox lives in the client
pub const FRIEND_REQUESTS_LINK: &str = "/friend-requests";

/// Longest message a notification row accepts
pub const MAX_NOTIFICATION_MESSAGE: usize = 255;

#[derive(Debug, Clone)]
pub enum Event<'a> {
    /// `from` asked `to` to be friends
    FriendRequestSent { from: &'a User, to: &'a User },
    /// `accepter` accepted the request `sender` made
    FriendRequestAccepted { sender: &'a User, accepter: &'a User },
    PostLiked { liker: &'a User, author_id: &'a str, post_id: &'a str },
    CommentCreated { commenter: &'a User, author_id: &'a str, post_id: &'a str },
    Mentioned { actor: &'a User, mentioned_id: &'a str, post_id: &'a str },
}

impl<'a> Event<'a> {
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::FriendRequestSent { .. } => "friend_request.sent",
            Event::FriendRequestAccepted { .. } => "friend_request.accepted",
            Event::PostLiked { .. } => "post.liked",
            Event::CommentCreated { .. } => "comment.created",
            Event::Mentioned { .. } => "mention.created",
        }
    }

    /// The user who caused the event
    pub fn actor(&self) -> &'a User {
        match *self {
            Event::FriendRequestSent { from, .. } => from,
            Event::FriendRequestAccepted { accepter, .. } => accepter,
            Event::PostLiked { liker, .. } => liker,
            Event::CommentCreated { commenter, .. } => commenter,
            Event::Mentioned { actor, .. } => actor,
        }
    }

    /// The user who should be told
    pub fn recipient_id(&self) -> &'a str {
        match *self {
            Event::FriendRequestSent { to, .. } => &to.id,
            Event::FriendRequestAccepted { sender, .. } => &sender.id,
            Event::PostLiked { author_id, .. } => author_id,
            Event::CommentCreated { author_id, .. } => author_id,
            Event::Mentioned { mentioned_id, .. } => mentioned_id,
        }
    }

    /// Build the notification for the recipient, or `None` when the actor
    /// would be notifying themselves
    pub fn to_notification(&self) -> Option<Notification> {
        let actor = self.actor();
        if actor.id == self.recipient_id() {
            return None;
        }

        let (notification_type, message, link) = match self {
            Event::FriendRequestSent { from, .. } => (
                NotificationType::FriendRequest,
                format!("{} sent you a friend request", from.username),
                FRIEND_REQUESTS_LINK.to_string(),
            ),
            Event::FriendRequestAccepted { accepter, .. } => (
                NotificationType::FriendAccepted,
                format!("{} accepted your friend request", accepter.username),
                format!("/profiles/{}", accepter.id),
            ),
            Event::PostLiked { liker, post_id, .. } => (
                NotificationType::PostLike,
                format!("{} liked your post", liker.username),
                format!("/posts/{}", post_id),
            ),
            Event::CommentCreated { commenter, post_id, .. } => (
                NotificationType::Comment,
                format!("{} commented on your post", commenter.username),
                format!("/posts/{}", post_id),
            ),
            Event::Mentioned { actor, post_id, .. } => (
                NotificationType::Mention,
                format!("{} mentioned you in a comment", actor.username),
                format!("/posts/{}", post_id),
            ),
        };

        Some(Notification {
            id: Uuid::new_v4().to_string(),
            user_id: self.recipient_id().to_string(),
            notification_type,
            related_user_id: Some(actor.id.clone()),
            message: truncate_chars(&message, MAX_NOTIFICATION_MESSAGE),
            link,
            is_read: false,
            created_at: Utc::now(),
        })
    }
}

/// `@name` handles in a piece of text, in order of first appearance, without duplicates.
/// Handles use the same alphabet as usernames; an `@` inside a word (an email
/// address, say) does not start one.
pub fn extract_mentions(text: &str) -> Vec<String> {
    static MENTION_RE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?:^|[^A-Za-z0-9_.])@([A-Za-z0-9_.]+)").expect("mention regex should compile")
    });

    let mut mentions: Vec<String> = Vec::new();
    for caps in MENTION_RE.captures_iter(text) {
        let handle = caps[1].trim_end_matches('.');
        if !handle.is_empty() && !mentions.iter().any(|m| m.eq_ignore_ascii_case(handle)) {
            mentions.push(handle.to_string());
        }
    }
    mentions
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str, username: &str) -> User {
        User {
            id: id.to_string(),
            username: username.to_string(),
            email: format!("{}@example.com", username),
            password_hash: String::new(),
            display_name: username.to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_friend_request_sent_notifies_recipient() {
        let alice = user("u1", "alice");
        let bob = user("u2", "bob");
        let event = Event::FriendRequestSent { from: &alice, to: &bob };
        assert_eq!(event.event_type(), "friend_request.sent");

        let n = event.to_notification().unwrap();
        assert_eq!(n.user_id, "u2");
        assert_eq!(n.related_user_id.as_deref(), Some("u1"));
        assert_eq!(n.notification_type, NotificationType::FriendRequest);
        assert_eq!(n.message, "alice sent you a friend request");
        assert_eq!(n.link, FRIEND_REQUESTS_LINK);
        assert!(!n.is_read);
    }

    #[test]
    fn test_friend_request_accepted_notifies_sender() {
        let alice = user("u1", "alice");
        let bob = user("u2", "bob");
        let n = Event::FriendRequestAccepted { sender: &alice, accepter: &bob }
            .to_notification()
            .unwrap();
        assert_eq!(n.user_id, "u1");
        assert_eq!(n.notification_type, NotificationType::FriendAccepted);
        assert_eq!(n.message, "bob accepted your friend request");
    }

    #[test]
    fn test_no_self_notification() {
        let alice = user("u1", "alice");
        let event = Event::PostLiked { liker: &alice, author_id: "u1", post_id: "p1" };
        assert!(event.to_notification().is_none());
    }

    #[test]
    fn test_long_usernames_are_truncated() {
        let long = user("u1", &"x".repeat(300));
        let bob = user("u2", "bob");
        let n = Event::CommentCreated { commenter: &long, author_id: &bob.id, post_id: "p1" }
            .to_notification()
            .unwrap();
        assert_eq!(n.message.chars().count(), MAX_NOTIFICATION_MESSAGE);
    }

    #[test]
    fn test_extract_mentions() {
        assert_eq!(extract_mentions("hi @bob and @carol_1!"), vec!["bob", "carol_1"]);
        assert_eq!(extract_mentions("@bob @Bob @bob."), vec!["bob"]);
        assert!(extract_mentions("mail me at bob@example.com").is_empty());
        assert!(extract_mentions("just an @ sign").is_empty());
        assert_eq!(extract_mentions("(@dave),@erin"), vec!["dave", "erin"]);
    }
}
