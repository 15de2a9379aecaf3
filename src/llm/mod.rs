//! Inference collaborator: model catalog and streaming chat completion.
//!
//! The rest of the crate only sees [`ChatModel`]: given a model id and the
//! ordered conversation history it yields a lazy, finite stream of text
//! fragments. [`collect_reply`] folds that stream into the final reply.

pub mod catalog;
pub mod ollama_chat;

pub use catalog::ModelCatalog;
pub use ollama_chat::OllamaChatClient;

use std::future::Future;
use std::pin::Pin;

use futures::StreamExt;
use futures::stream::BoxStream;

use crate::core::errors::ChatResult;
use crate::store::message::HistoryEntry;

/// Boxed future type for model operations.
pub type ModelFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Incremental reply text. Not restartable; consume it once.
pub type FragmentStream = BoxStream<'static, ChatResult<String>>;

/// A text-generation service that streams its reply.
pub trait ChatModel: Send + Sync {
    /// Start generating a reply to `messages` with `model`.
    ///
    /// # Errors
    /// Returns an error if the request cannot be started; errors raised while
    /// streaming are yielded by the stream itself.
    fn stream_chat<'a>(
        &'a self,
        model: &'a str,
        messages: Vec<HistoryEntry>,
    ) -> ModelFuture<'a, ChatResult<FragmentStream>>;
}

/// Drain `fragments`, handing each one to `on_fragment`, and return the
/// concatenated text. The first error aborts the fold.
///
/// # Errors
/// Returns the first error yielded by the stream.
pub async fn collect_reply<F>(mut fragments: FragmentStream, mut on_fragment: F) -> ChatResult<String>
where
    F: FnMut(&str),
{
    let mut reply = String::new();
    while let Some(fragment) = fragments.next().await {
        let fragment = fragment?;
        on_fragment(&fragment);
        reply.push_str(&fragment);
    }
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use futures::stream;

    use super::*;
    use crate::core::errors::ChatError;

    #[tokio::test]
    async fn test_collect_reply_concatenates_in_order() {
        let fragments: FragmentStream = stream::iter(vec![
            Ok("Hel".to_string()),
            Ok("lo".to_string()),
            Ok(" world".to_string()),
        ])
        .boxed();

        let mut seen = Vec::new();
        let reply = collect_reply(fragments, |f| seen.push(f.to_string()))
            .await
            .unwrap();

        assert_eq!(reply, "Hello world");
        assert_eq!(seen, vec!["Hel", "lo", " world"]);
    }

    #[tokio::test]
    async fn test_collect_reply_stops_on_error() {
        let fragments: FragmentStream = stream::iter(vec![
            Ok("partial".to_string()),
            Err(ChatError::Inference("model crashed".to_string())),
            Ok("never".to_string()),
        ])
        .boxed();

        let mut count = 0;
        let result = collect_reply(fragments, |_| count += 1).await;
        assert!(matches!(result, Err(ChatError::Inference(_))));
        assert_eq!(count, 1);
    }
}
