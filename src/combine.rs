//! Mergeable accumulators.
//!
//! Both the local extraction stage and the shard merge stage fold values into
//! accumulators that must give the same answer whichever partition saw a value
//! first. [`CombineFn`] captures that contract: `add_input` folds one value,
//! `merge` folds another accumulator, and both must be associative and
//! commutative so partial results can be combined in any order.

/// A combiner from inputs `V` through accumulator `A` to output `O`.
pub trait CombineFn<V, A, O>: Send + Sync + 'static {
    fn create(&self) -> A;
    fn add_input(&self, acc: &mut A, v: V);
    fn merge(&self, acc: &mut A, other: A);
    fn finish(&self, acc: A) -> O;

    /// Fold a whole batch of inputs into a fresh accumulator.
    fn build_from<I>(&self, values: I) -> A
    where
        I: IntoIterator<Item = V>,
    {
        let mut acc = self.create();
        for v in values {
            self.add_input(&mut acc, v);
        }
        acc
    }
}

/// Adds counts; used for the per-partition counters.
#[derive(Clone, Copy, Debug, Default)]
pub struct Sum;

impl CombineFn<u64, u64, u64> for Sum {
    fn create(&self) -> u64 {
        0
    }
    fn add_input(&self, acc: &mut u64, v: u64) {
        *acc += v;
    }
    fn merge(&self, acc: &mut u64, other: u64) {
        *acc += other;
    }
    fn finish(&self, acc: u64) -> u64 {
        acc
    }
}
