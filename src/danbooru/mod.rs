//! Danbooru board API: the post model, the paginated source trait and its
//! HTTP implementation.

pub mod client;
pub mod post;

pub use client::{
    ApiError, ApiResult, ClientConfig, Credentials, DanbooruClient, PostSource, normalize_query,
};
pub use post::Post;
