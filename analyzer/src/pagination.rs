//! Continuation-token pagination
//!
//! [`page_stream`] turns a "fetch one page" function into a lazy stream of
//! pages; nothing is requested until the stream is polled, and calling it
//! again restarts from the first page. [`collect_pages`] drains a stream
//! into one vector. The same code serves suites, test cases, runs and
//! results.

use std::collections::HashSet;
use std::future::Future;

use futures_util::stream::{self, Stream, StreamExt};
use tracing::warn;

use crate::provider::{Page, ProviderResult};

enum Cursor {
    Start,
    Next(String),
    Done,
}

/// Lazily yield each page's items until no continuation token is returned
///
/// A page error is yielded once and ends the stream. A token that was
/// already seen also ends the stream, so a misbehaving upstream cannot loop
/// forever.
pub fn page_stream<'a, T, F, Fut>(fetch: F) -> impl Stream<Item = ProviderResult<Vec<T>>> + 'a
where
    T: 'a,
    F: FnMut(Option<String>) -> Fut + 'a,
    Fut: Future<Output = ProviderResult<Page<T>>> + 'a,
{
    stream::unfold(
        (fetch, Cursor::Start, HashSet::<String>::new()),
        |(mut fetch, cursor, mut seen)| async move {
            let token = match cursor {
                Cursor::Done => return None,
                Cursor::Start => None,
                Cursor::Next(token) => Some(token),
            };

            match fetch(token).await {
                Ok(page) => {
                    let next = match page.continuation_token {
                        Some(token) if !token.is_empty() => {
                            if seen.insert(token.clone()) {
                                Cursor::Next(token)
                            } else {
                                warn!(token = %token, "continuation token repeated, stopping");
                                Cursor::Done
                            }
                        }
                        _ => Cursor::Done,
                    };
                    Some((Ok(page.items), (fetch, next, seen)))
                }
                Err(e) => Some((Err(e), (fetch, Cursor::Done, seen))),
            }
        },
    )
}

/// Fetch every page and concatenate the items
///
/// Fails with the first page error; items from earlier pages are dropped
/// so a unit is either complete or absent.
pub async fn collect_pages<'a, T, F, Fut>(fetch: F) -> ProviderResult<Vec<T>>
where
    T: 'a,
    F: FnMut(Option<String>) -> Fut + 'a,
    Fut: Future<Output = ProviderResult<Page<T>>> + 'a,
{
    let mut pages = std::pin::pin!(page_stream(fetch));
    let mut items = Vec::new();
    while let Some(page) = pages.next().await {
        items.extend(page?);
    }
    Ok(items)
}
