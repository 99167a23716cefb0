#[cfg(not(target_arch = "wasm32"))]
use rayon::prelude::*;

#[cfg(not(target_arch = "wasm32"))]
const PARALLEL_THRESHOLD: usize = 1024;

pub fn for_each_indexed_mut<T, F>(slice: &mut [T], f: F)
where
    T: Send,
    F: Fn(usize, &mut T) + Sync + Send,
{
    #[cfg(not(target_arch = "wasm32"))]
    {
        if slice.len() >= PARALLEL_THRESHOLD {
            slice
                .par_iter_mut()
                .enumerate()
                .for_each(|(idx, value)| f(idx, value));
            return;
        }
    }

    for (idx, value) in slice.iter_mut().enumerate() {
        f(idx, value);
    }
}

/// Splits `slice` into disjoint runs of `chunk_len` and hands each run, with
/// its chunk number, to `f`. `min_chunks` is the smallest number of chunks a
/// single task processes.
pub fn for_each_chunk_mut<T, F>(slice: &mut [T], chunk_len: usize, min_chunks: usize, f: F)
where
    T: Send,
    F: Fn(usize, &mut [T]) + Sync + Send,
{
    let chunk_len = chunk_len.max(1);

    #[cfg(not(target_arch = "wasm32"))]
    {
        if slice.len() >= PARALLEL_THRESHOLD {
            slice
                .par_chunks_mut(chunk_len)
                .with_min_len(min_chunks.max(1))
                .enumerate()
                .for_each(|(idx, chunk)| f(idx, chunk));
            return;
        }
    }
    #[cfg(target_arch = "wasm32")]
    let _ = min_chunks;

    for (idx, chunk) in slice.chunks_mut(chunk_len).enumerate() {
        f(idx, chunk);
    }
}

pub fn for_each_index<F>(len: usize, min_len: usize, f: F)
where
    F: Fn(usize) + Sync + Send,
{
    #[cfg(not(target_arch = "wasm32"))]
    {
        if len >= PARALLEL_THRESHOLD {
            (0..len)
                .into_par_iter()
                .with_min_len(min_len.max(1))
                .for_each(&f);
            return;
        }
    }
    #[cfg(target_arch = "wasm32")]
    let _ = min_len;

    for idx in 0..len {
        f(idx);
    }
}

pub fn count_indices<F>(len: usize, min_len: usize, f: F) -> usize
where
    F: Fn(usize) -> bool + Sync + Send,
{
    #[cfg(not(target_arch = "wasm32"))]
    {
        if len >= PARALLEL_THRESHOLD {
            return (0..len)
                .into_par_iter()
                .with_min_len(min_len.max(1))
                .filter(|idx| f(*idx))
                .count();
        }
    }
    #[cfg(target_arch = "wasm32")]
    let _ = min_len;

    (0..len).filter(|idx| f(*idx)).count()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn chunks_cover_slice_once() {
        let mut values = vec![0usize; 5000];
        for_each_chunk_mut(&mut values, 7, 4, |chunk, run| {
            for (offset, value) in run.iter_mut().enumerate() {
                *value += chunk * 7 + offset;
            }
        });
        assert!(values.iter().enumerate().all(|(i, v)| i == *v));
    }

    #[test]
    fn every_index_visited_once() {
        let sum = AtomicUsize::new(0);
        for_each_index(4096, 64, |idx| {
            sum.fetch_add(idx, Ordering::Relaxed);
        });
        assert_eq!(sum.into_inner(), 4095 * 4096 / 2);
        assert_eq!(count_indices(4096, 64, |idx| idx % 2 == 0), 2048);
    }
}
