use futures::{Stream, StreamExt};
use std::mem;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};

use super::FragmentStream;
use crate::error::ChatError;
use crate::web::models::{ChatResponse, Source};

// Sources ride along with the first fragment only.
#[derive(Debug)]
enum Attachment {
    AwaitingFirstFragment(Vec<Source>),
    Streaming,
}

/// Turns raw model fragments into response chunks.
///
/// The whole generation shares one deadline; when it passes, the stream yields
/// a timeout error and ends. Any upstream error also ends it.
pub struct ChatStream {
    fragments: FragmentStream,
    attachment: Attachment,
    deadline: Instant,
    timeout: Duration,
    finished: bool,
}

impl ChatStream {
    pub fn new(fragments: FragmentStream, sources: Vec<Source>, timeout: Duration) -> Self {
        Self::with_deadline(fragments, sources, Instant::now() + timeout, timeout)
    }

    /// Continues a deadline that was started before the model was invoked.
    pub fn with_deadline(
        fragments: FragmentStream,
        sources: Vec<Source>,
        deadline: Instant,
        timeout: Duration,
    ) -> Self {
        Self {
            fragments,
            attachment: Attachment::AwaitingFirstFragment(sources),
            deadline,
            timeout,
            finished: false,
        }
    }

    pub async fn next_chunk(&mut self) -> Option<Result<ChatResponse, ChatError>> {
        if self.finished {
            return None;
        }

        loop {
            let next = match timeout_at(self.deadline, self.fragments.next()).await {
                Ok(next) => next,
                Err(_) => {
                    self.finished = true;
                    return Some(Err(ChatError::GenerationTimeout(self.timeout.as_secs())));
                }
            };

            match next {
                None => {
                    self.finished = true;
                    return None;
                }
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(e));
                }
                // Empty deltas would otherwise claim the sources.
                Some(Ok(text)) if text.is_empty() => continue,
                Some(Ok(text)) => {
                    let sources = match mem::replace(&mut self.attachment, Attachment::Streaming) {
                        Attachment::AwaitingFirstFragment(sources) => Some(sources),
                        Attachment::Streaming => None,
                    };
                    return Some(Ok(ChatResponse { message: text, sources }));
                }
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<ChatResponse, ChatError>> {
        futures::stream::unfold(self, |mut chat| async move {
            chat.next_chunk().await.map(|chunk| (chunk, chat))
        })
    }

    /// Drains the stream into a single response for non-streaming callers.
    pub async fn collect_response(mut self) -> Result<ChatResponse, ChatError> {
        let mut message = String::new();
        let mut sources = None;

        while let Some(chunk) = self.next_chunk().await {
            let chunk = chunk?;
            if chunk.sources.is_some() {
                sources = chunk.sources;
            }
            message.push_str(&chunk.message);
        }

        if let Attachment::AwaitingFirstFragment(unsent) = self.attachment {
            sources = Some(unsent);
        }

        Ok(ChatResponse { message, sources })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn source(id: &str) -> Source {
        Source {
            id: id.to_string(),
            title: format!("Title {}", id),
            content: String::new(),
            url: None,
            score: None,
        }
    }

    fn fragments(parts: Vec<Result<&'static str, ChatError>>) -> FragmentStream {
        Box::pin(stream::iter(
            parts.into_iter().map(|p| p.map(|s| s.to_string())),
        ))
    }

    const LONG: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn sources_only_on_first_chunk() {
        let chat = ChatStream::new(
            fragments(vec![Ok("Hello"), Ok(", "), Ok("world")]),
            vec![source("a"), source("b")],
            LONG,
        );

        let chunks: Vec<ChatResponse> = chat
            .into_stream()
            .map(|c| c.unwrap())
            .collect()
            .await;

        assert_eq!(chunks.len(), 3);
        let first = chunks[0].sources.as_ref().unwrap();
        assert_eq!(first.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(chunks[1..].iter().all(|c| c.sources.is_none()));

        let text: String = chunks.iter().map(|c| c.message.as_str()).collect();
        assert_eq!(text, "Hello, world");
    }

    #[tokio::test]
    async fn empty_fragments_are_skipped() {
        let mut chat = ChatStream::new(
            fragments(vec![Ok(""), Ok("first")]),
            vec![source("a")],
            LONG,
        );
        let chunk = chat.next_chunk().await.unwrap().unwrap();
        assert_eq!(chunk.message, "first");
        assert_eq!(chunk.sources.map(|s| s.len()), Some(1));
        assert!(chat.next_chunk().await.is_none());
    }

    #[tokio::test]
    async fn upstream_error_ends_the_stream() {
        let mut chat = ChatStream::new(
            fragments(vec![
                Ok("partial"),
                Err(ChatError::Upstream("throttled".into())),
                Ok("never seen"),
            ]),
            vec![],
            LONG,
        );

        assert!(chat.next_chunk().await.unwrap().is_ok());
        assert!(matches!(chat.next_chunk().await, Some(Err(ChatError::Upstream(_)))));
        assert!(chat.next_chunk().await.is_none());
    }

    #[tokio::test]
    async fn stalled_generation_times_out() {
        let stalled: FragmentStream = Box::pin(
            stream::iter(vec![Ok("tick".to_string())]).chain(stream::pending()),
        );
        let mut chat = ChatStream::new(stalled, vec![], Duration::from_millis(50));

        assert_eq!(chat.next_chunk().await.unwrap().unwrap().message, "tick");
        assert!(matches!(
            chat.next_chunk().await,
            Some(Err(ChatError::GenerationTimeout(_)))
        ));
        assert!(chat.next_chunk().await.is_none());
    }

    #[tokio::test]
    async fn shared_deadline_counts_time_already_spent() {
        let stalled: FragmentStream = Box::pin(stream::pending());
        let timeout = Duration::from_secs(60);
        let already_passed = Instant::now() - Duration::from_millis(1);
        let mut chat = ChatStream::with_deadline(stalled, vec![], already_passed, timeout);

        assert!(matches!(
            chat.next_chunk().await,
            Some(Err(ChatError::GenerationTimeout(60)))
        ));
    }

    #[tokio::test]
    async fn collect_joins_fragments() {
        let chat = ChatStream::new(
            fragments(vec![Ok("a"), Ok("b"), Ok("c")]),
            vec![source("x")],
            LONG,
        );
        let response = chat.collect_response().await.unwrap();
        assert_eq!(response.message, "abc");
        assert_eq!(response.sources.unwrap()[0].id, "x");
    }

    #[tokio::test]
    async fn collect_keeps_sources_when_model_is_silent() {
        let chat = ChatStream::new(fragments(vec![]), vec![source("x")], LONG);
        let response = chat.collect_response().await.unwrap();
        assert_eq!(response.message, "");
        assert_eq!(response.sources.map(|s| s.len()), Some(1));
    }

    #[tokio::test]
    async fn collect_propagates_errors() {
        let chat = ChatStream::new(
            fragments(vec![Ok("a"), Err(ChatError::MalformedChunk("bad".into()))]),
            vec![],
            LONG,
        );
        assert!(matches!(chat.collect_response().await, Err(ChatError::MalformedChunk(_))));
    }
}
