use anyhow::Result;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Train and test partitions of one sample.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetSplit<T> {
    pub train: Vec<T>,
    pub test: Vec<T>,
}

/// Seeded random subset of at most `size` items, in shuffled order.
pub fn sample<T>(mut items: Vec<T>, size: usize, seed: u64) -> Vec<T> {
    let mut rng = StdRng::seed_from_u64(seed);
    items.shuffle(&mut rng);
    items.truncate(size);
    items
}

/// Seeded shuffle followed by a cut; the test share rounds up.
pub fn split_train_test<T>(mut items: Vec<T>, test_fraction: f64, seed: u64) -> Result<DatasetSplit<T>> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        anyhow::bail!("test fraction must be in (0, 1), got {test_fraction}");
    }

    let mut rng = StdRng::seed_from_u64(seed);
    items.shuffle(&mut rng);

    let n_test = ((items.len() as f64) * test_fraction).ceil() as usize;
    let train = items.split_off(n_test.min(items.len()));
    Ok(DatasetSplit { train, test: items })
}
