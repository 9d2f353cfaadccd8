use std::future::Future;

use futures::stream::{self, StreamExt, TryStreamExt};

/// Run `f` over `items` with at most `concurrency` calls in flight.
///
/// Results come back in input order even though calls complete out of
/// order. The first error wins and stops scheduling further calls.
pub async fn try_map_ordered<I, T, E, F, Fut>(
    items: I,
    concurrency: usize,
    f: F,
) -> Result<Vec<T>, E>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    stream::iter(items)
        .map(f)
        .buffered(concurrency.max(1))
        .try_collect()
        .await
}
