use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

use crate::events::{extract_mentions, Event};
use crate::models::*;
use crate::services::{check_max_chars, check_url, validation, ServiceError, ServiceResult};
use crate::store::{Store, StoreError};

pub const MAX_CAPTION: usize = 2200;
pub const MAX_IMAGE_URL: usize = 500;
pub const MAX_COMMENT: usize = 1000;
pub const FEED_LIMIT: i64 = 50;

#[derive(Debug, Clone, Serialize)]
pub struct PostView {
    #[serde(flatten)]
    pub post: Post,
    pub author: UserSummary,
    pub like_count: i64,
    /// Whether the viewer likes this post
    pub liked: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommentView {
    #[serde(flatten)]
    pub comment: Comment,
    pub author: UserSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct PostDetail {
    #[serde(flatten)]
    pub view: PostView,
    pub comments: Vec<CommentView>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct LikeOutcome {
    pub liked: bool,
    pub like_count: i64,
}

#[derive(Clone)]
pub struct PostService {
    store: Arc<Store>,
}

impl PostService {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    fn load_post(&self, id: &str) -> ServiceResult<Post> {
        match self.store.get_post(id) {
            Ok(post) => Ok(post),
            Err(StoreError::NotFound(_)) => Err(ServiceError::NotFound("Post not found".to_string())),
            Err(e) => Err(e.into()),
        }
    }

    fn view(&self, viewer_id: &str, post: Post) -> ServiceResult<PostView> {
        Ok(PostView {
            author: self.store.get_user_summary(&post.author_id)?,
            like_count: self.store.count_likes(&post.id)?,
            liked: self.store.has_liked(&post.id, viewer_id)?,
            post,
        })
    }

    /// Newest posts from everyone
    pub fn feed(&self, viewer_id: &str) -> ServiceResult<Vec<PostView>> {
        self.store
            .list_posts(FEED_LIMIT)?
            .into_iter()
            .map(|post| self.view(viewer_id, post))
            .collect()
    }

    pub fn create(&self, author: &User, req: &CreatePostRequest) -> ServiceResult<PostView> {
        let image_url = req.image_url.trim();
        let caption = req.caption.trim();
        check_url(image_url, MAX_IMAGE_URL, "Image URL")?;
        check_max_chars(caption, MAX_CAPTION, "Caption")?;
        if image_url.is_empty() && caption.is_empty() {
            return Err(validation("A post needs an image or a caption"));
        }

        let mut post = Post {
            id: String::new(),
            author_id: author.id.clone(),
            image_url: image_url.to_string(),
            caption: caption.to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        self.store.create_post(&mut post)?;

        log::info!("{} created post {}", author.username, post.id);
        self.view(&author.id, post)
    }

    /// A post with its comments, oldest comment first
    pub fn detail(&self, viewer_id: &str, post_id: &str) -> ServiceResult<PostDetail> {
        let post = self.load_post(post_id)?;
        let comments = self
            .store
            .list_comments(&post.id)?
            .into_iter()
            .map(|comment| {
                let author = self.store.get_user_summary(&comment.author_id)?;
                Ok(CommentView { comment, author })
            })
            .collect::<ServiceResult<Vec<_>>>()?;

        Ok(PostDetail {
            view: self.view(viewer_id, post)?,
            comments,
        })
    }

    pub fn update(&self, user: &User, post_id: &str, req: &UpdatePostRequest) -> ServiceResult<PostView> {
        let mut post = self.load_post(post_id)?;
        if post.author_id != user.id {
            return Err(ServiceError::Forbidden("You can only edit your own posts".to_string()));
        }

        if let Some(image_url) = &req.image_url {
            let image_url = image_url.trim();
            check_url(image_url, MAX_IMAGE_URL, "Image URL")?;
            post.image_url = image_url.to_string();
        }
        if let Some(caption) = &req.caption {
            let caption = caption.trim();
            check_max_chars(caption, MAX_CAPTION, "Caption")?;
            post.caption = caption.to_string();
        }
        if post.image_url.is_empty() && post.caption.is_empty() {
            return Err(validation("A post needs an image or a caption"));
        }

        self.store.update_post(&mut post)?;
        log::info!("{} updated post {}", user.username, post.id);
        self.view(&user.id, post)
    }

    pub fn delete(&self, user: &User, post_id: &str) -> ServiceResult<()> {
        let post = self.load_post(post_id)?;
        if post.author_id != user.id {
            return Err(ServiceError::Forbidden("You can only delete your own posts".to_string()));
        }
        self.store.delete_post(&post.id)?;
        log::info!("{} deleted post {}", user.username, post.id);
        Ok(())
    }

    /// Like the post, or take the like back if it is already there
    pub fn toggle_like(&self, user: &User, post_id: &str) -> ServiceResult<LikeOutcome> {
        let post = self.load_post(post_id)?;
        let notification = Event::PostLiked {
            liker: user,
            author_id: &post.author_id,
            post_id: &post.id,
        }
        .to_notification();

        let liked = self.store.toggle_like(&post.id, &user.id, notification.as_ref())?;
        log::debug!("{} {} post {}", user.username, if liked { "liked" } else { "unliked" }, post.id);
        Ok(LikeOutcome {
            liked,
            like_count: self.store.count_likes(&post.id)?,
        })
    }

    /// Comment on a post. The author hears about it, and so does every other
    /// existing user named with `@username`.
    pub fn add_comment(&self, user: &User, post_id: &str, text: &str) -> ServiceResult<CommentView> {
        let post = self.load_post(post_id)?;
        let text = text.trim();
        if text.is_empty() {
            return Err(validation("Comment cannot be empty"));
        }
        check_max_chars(text, MAX_COMMENT, "Comment")?;

        let mut notifications = Vec::new();
        notifications.extend(
            Event::CommentCreated {
                commenter: user,
                author_id: &post.author_id,
                post_id: &post.id,
            }
            .to_notification(),
        );
        for handle in extract_mentions(text) {
            let mentioned = match self.store.get_user_by_username(&handle) {
                Ok(u) => u,
                Err(StoreError::NotFound(_)) => continue,
                Err(e) => return Err(e.into()),
            };
            // the author already gets the comment notification
            if mentioned.id == post.author_id {
                continue;
            }
            notifications.extend(
                Event::Mentioned {
                    actor: user,
                    mentioned_id: &mentioned.id,
                    post_id: &post.id,
                }
                .to_notification(),
            );
        }

        let mut comment = Comment {
            id: String::new(),
            post_id: post.id.clone(),
            author_id: user.id.clone(),
            text: text.to_string(),
            created_at: Utc::now(),
        };
        self.store.create_comment(&mut comment, &notifications)?;

        log::info!(
            "{} commented on post {} ({} notifications)",
            user.username,
            post.id,
            notifications.len()
        );
        Ok(CommentView {
            author: self.store.get_user_summary(&user.id)?,
            comment,
        })
    }
}
