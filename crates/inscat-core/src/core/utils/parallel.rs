use tracing::warn;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Maps `f` over `items` on a dedicated pool of `threads` workers and returns the
/// results in input order.
///
/// Each task only reads shared, immutable state, so the result is identical to the
/// sequential map. With `threads <= 1`, without the `parallel` feature, or when the
/// pool cannot be created, the work runs on the calling thread.
pub fn map_in_pool<T, R, F>(threads: usize, items: &[T], f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync + Send,
{
    #[cfg(feature = "parallel")]
    {
        if threads > 1 && items.len() > 1 {
            match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
                Ok(pool) => return pool.install(|| items.par_iter().map(&f).collect()),
                Err(e) => warn!(threads, "Failed to build worker pool ({e}); running sequentially."),
            }
        }
    }

    #[cfg(not(feature = "parallel"))]
    {
        if threads > 1 {
            warn!(threads, "Built without the `parallel` feature; running sequentially.");
        }
    }

    items.iter().map(f).collect()
}
