//! Array-backed max-heap primitives.
//!
//! Both functions operate on a slice that is maintained as a binary heap under `less`, where
//! `less(a, b)` returns true when `a` should sit below `b`. The element ordered highest lives at index 0.

/// Pushes the last element of `heap` into the heap formed by the elements before it.
///
/// `heap[..heap.len() - 1]` must already be a valid heap under `less`.
#[inline(always)]
pub fn binary_heap_push<T, F>(heap: &mut [T], mut less: F)
where
    F: FnMut(&T, &T) -> bool,
{
    let mut current = match heap.len() {
        0 => return,
        count => count - 1,
    };
    while current > 0 {
        let parent = (current - 1) >> 1;
        // Sift up while the parent is ordered below the child.
        if less(&heap[parent], &heap[current]) {
            heap.swap(parent, current);
            current = parent;
        } else {
            break;
        }
    }
}

/// Pops the highest element of `heap`, moving it to the last slot.
///
/// `heap` must be a valid heap under `less`. On return `heap[..heap.len() - 1]` is a valid heap
/// and the popped element is at `heap[heap.len() - 1]`.
#[inline(always)]
pub fn binary_heap_pop<T, F>(heap: &mut [T], mut less: F)
where
    F: FnMut(&T, &T) -> bool,
{
    debug_assert!(!heap.is_empty(), "Cannot pop from an empty heap!");
    if heap.is_empty() {
        return;
    }
    let last = heap.len() - 1;
    heap.swap(0, last);

    let count = last;
    let mut largest = 0usize;
    loop {
        let mut child = (largest << 1) + 1;
        if child >= count {
            break;
        }
        let prev_largest = largest;
        if less(&heap[largest], &heap[child]) {
            largest = child;
        }
        child += 1;
        if child < count && less(&heap[largest], &heap[child]) {
            largest = child;
        }
        if prev_largest == largest {
            break;
        }
        heap.swap(prev_largest, largest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Lcg;

    fn is_heap<T, F: FnMut(&T, &T) -> bool>(heap: &[T], mut less: F) -> bool {
        (1..heap.len()).all(|i| !less(&heap[(i - 1) / 2], &heap[i]))
    }

    #[test]
    fn test_push_keeps_heap_valid() {
        let mut rng = Lcg::new(7);
        let mut heap: Vec<u32> = Vec::new();
        for _ in 0..200 {
            heap.push(rng.next_u32() % 1000);
            binary_heap_push(&mut heap, |a, b| a < b);
            assert!(is_heap(&heap, |a, b| a < b));
        }
    }

    #[test]
    fn test_pop_returns_maximum() {
        let mut rng = Lcg::new(42);
        let mut heap: Vec<u32> = Vec::new();
        for _ in 0..100 {
            heap.push(rng.next_u32() % 50);
            binary_heap_push(&mut heap, |a, b| a < b);
        }

        let mut previous = u32::MAX;
        while !heap.is_empty() {
            let expected = *heap.iter().max().unwrap();
            binary_heap_pop(&mut heap, |a, b| a < b);
            let popped = heap.pop().unwrap();
            assert_eq!(popped, expected);
            assert!(popped <= previous);
            assert!(is_heap(&heap, |a, b| a < b));
            previous = popped;
        }
    }

    #[test]
    fn test_inverted_predicate_yields_min_heap() {
        let mut heap = Vec::new();
        for value in [5.0f32, 1.0, 3.0, 0.5, 4.0] {
            heap.push(value);
            binary_heap_push(&mut heap, |a, b| a > b);
        }
        binary_heap_pop(&mut heap, |a, b| a > b);
        assert_eq!(heap.pop(), Some(0.5));
        binary_heap_pop(&mut heap, |a, b| a > b);
        assert_eq!(heap.pop(), Some(1.0));
    }

    #[test]
    fn test_single_element() {
        let mut heap = vec![9];
        binary_heap_push(&mut heap, |a: &i32, b: &i32| a < b);
        binary_heap_pop(&mut heap, |a: &i32, b: &i32| a < b);
        assert_eq!(heap, vec![9]);
    }
}
