use crate::Promise;

/// Blocks until every promise's join completes, in the order given.
///
/// Settlement happens on the executors' threads in the background, so the
/// total wait is bounded by the slowest promise, not the sum.
///
/// ```
/// use promise_chain::{wait_all, Promise};
///
/// let promises: Vec<Promise<u64>> = (1..=4)
///     .map(|n| Promise::new(move |resolve, _reject| resolve(n * n)))
///     .collect();
/// for promise in &promises {
///     promise.then(|v| v + 1);
/// }
/// wait_all(&promises);
/// let results: Vec<_> = promises.iter().filter_map(Promise::result).collect();
/// assert_eq!(results, vec![2, 5, 10, 17]);
/// ```
pub fn wait_all<'a, T, E, I>(promises: I)
where
    T: 'a,
    E: 'a,
    I: IntoIterator<Item = &'a Promise<T, E>>,
{
    for promise in promises {
        promise.wait()
    }
}

/// Async counterpart of [`wait_all`].
pub async fn settle_all<'a, T, E, I>(promises: I)
where
    T: 'a,
    E: 'a,
    I: IntoIterator<Item = &'a Promise<T, E>>,
{
    for promise in promises {
        promise.settled().await
    }
}
