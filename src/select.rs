//! One-pass selection of the `k` smallest elements of a stream.
//!
//! The eviction sampler draws a few hundred candidates and needs only the `k`
//! least valuable. Sorting the whole sample is wasteful, and a binary heap pays
//! `log k` per element; instead a buffer of `2k` elements is kept. Once it
//! fills up, a quickselect partitions it around the `k`-th element and the
//! upper half is discarded:
//!
//! ```text
//! buffer (2k):  [ e e e e e e e e | e e e e e e e e ]
//!                 quickselect around position k
//!               [ k smallest      | discarded       ]
//! ```
//!
//! Elements not below the running threshold (the largest of the `k` kept)
//! are rejected without touching the buffer. The whole pass is
//! `O(n + k log k)` time and `O(k)` memory.

use std::cmp::Ordering;

/// Returns the `k` smallest elements of `elements` according to `cmp`,
/// sorted ascending.
///
/// Fewer than `k` elements are returned when the input is shorter. Ties are
/// broken arbitrarily.
///
/// # Examples
///
/// ```
/// use closed_table::least_of;
///
/// let least = least_of([9, 3, 7, 1, 8, 2, 6], 3, |a: &i32, b: &i32| a.cmp(b));
/// assert_eq!(least, vec![1, 2, 3]);
/// ```
pub fn least_of<E, I, F>(elements: I, k: usize, mut cmp: F) -> Vec<E>
where
    I: IntoIterator<Item = E>,
    F: FnMut(&E, &E) -> Ordering,
{
    let mut elements = elements.into_iter();
    if k == 0 {
        return Vec::new();
    }
    if k >= usize::MAX / 4 {
        let mut all: Vec<E> = elements.collect();
        all.sort_unstable_by(&mut cmp);
        all.truncate(k);
        return all;
    }

    let cap = k * 2;
    let mut buffer: Vec<E> = Vec::with_capacity(cap.min(1024));

    // Fill the first k unconditionally, tracking the largest as the threshold.
    let mut threshold = 0usize;
    for e in elements.by_ref() {
        buffer.push(e);
        let last = buffer.len() - 1;
        if cmp(&buffer[last], &buffer[threshold]) == Ordering::Greater {
            threshold = last;
        }
        if buffer.len() == k {
            break;
        }
    }

    for e in elements {
        if cmp(&e, &buffer[threshold]) != Ordering::Less {
            continue;
        }
        buffer.push(e);
        if buffer.len() == cap {
            let min_threshold = select_k(&mut buffer, k, &mut cmp);
            buffer.truncate(k);
            threshold = (min_threshold + 1..k).fold(min_threshold, |max, i| {
                if cmp(&buffer[i], &buffer[max]) == Ordering::Greater {
                    i
                } else {
                    max
                }
            });
        }
    }

    buffer.sort_unstable_by(&mut cmp);
    buffer.truncate(k);
    buffer
}

/// Partitions `buffer` so that its first `k` elements are the `k` smallest.
///
/// Returns the leftmost position at which the largest of those `k` may sit;
/// everything before it is known to be no larger.
fn select_k<E, F>(buffer: &mut [E], k: usize, cmp: &mut F) -> usize
where
    F: FnMut(&E, &E) -> Ordering,
{
    let mut left = 0;
    let mut right = buffer.len() - 1;
    let mut min_threshold = 0;

    while left < right {
        let pivot = (left + right + 1) >> 1;
        let placed = partition(buffer, left, right, pivot, cmp);
        match placed.cmp(&k) {
            Ordering::Greater => right = placed - 1,
            Ordering::Less => {
                left = placed.max(left + 1);
                min_threshold = placed;
            }
            Ordering::Equal => break,
        }
    }
    min_threshold
}

/// Lomuto partition of `values[left..=right]` around `values[pivot]`.
/// Returns the pivot's final position.
fn partition<E, F>(values: &mut [E], left: usize, right: usize, pivot: usize, cmp: &mut F) -> usize
where
    F: FnMut(&E, &E) -> Ordering,
{
    values.swap(pivot, right);
    let mut store = left;
    for i in left..right {
        if cmp(&values[i], &values[right]) == Ordering::Less {
            values.swap(store, i);
            store += 1;
        }
    }
    values.swap(right, store);
    store
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    #[test]
    fn test_least_of_empty_and_zero() {
        let none: Vec<u32> = least_of(Vec::<u32>::new(), 5, |a, b| a.cmp(b));
        assert!(none.is_empty());
        let zero = least_of([3, 2, 1], 0, |a: &i32, b: &i32| a.cmp(b));
        assert!(zero.is_empty());
    }

    #[test]
    fn test_least_of_shorter_than_k() {
        let least = least_of([5, 1, 4], 10, |a: &i32, b: &i32| a.cmp(b));
        assert_eq!(least, vec![1, 4, 5]);
    }

    #[test]
    fn test_least_of_descending_input() {
        let input: Vec<u32> = (0..1000).rev().collect();
        let least = least_of(input, 7, |a, b| a.cmp(b));
        assert_eq!(least, vec![0, 1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_least_of_matches_full_sort() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(0x5eed);
        for k in [1usize, 2, 3, 8, 17, 64] {
            let mut input: Vec<u32> = (0..500).collect();
            input.shuffle(&mut rng);
            let least = least_of(input.iter().copied(), k, |a, b| a.cmp(b));
            let expected: Vec<u32> = (0..k as u32).collect();
            assert_eq!(least, expected, "k = {k}");
        }
    }

    #[test]
    fn test_least_of_with_duplicates() {
        let input = [4, 4, 1, 4, 1, 2, 2, 9, 0, 0, 4, 1];
        let least = least_of(input, 5, |a: &i32, b: &i32| a.cmp(b));
        assert_eq!(least, vec![0, 0, 1, 1, 1]);
    }

    #[test]
    fn test_least_of_custom_comparator() {
        let words = ["pear", "fig", "banana", "kiwi", "apple"];
        let shortest = least_of(words, 2, |a: &&str, b: &&str| a.len().cmp(&b.len()));
        assert_eq!(shortest[0], "fig");
        assert_eq!(shortest[1].len(), 4);
    }
}
