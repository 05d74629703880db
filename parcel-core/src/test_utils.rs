//! Test data helpers shared by the parcel crates

use rand::Rng;

/// Test data generators
pub struct TestDataGenerator;

impl TestDataGenerator {
    pub fn random_bytes(size: usize) -> Vec<u8> {
        let mut rng = rand::thread_rng();
        (0..size).map(|_| rng.gen()).collect()
    }

    /// Deterministic bytes where every offset is distinguishable
    pub fn patterned_bytes(size: usize) -> Vec<u8> {
        (0..size).map(|i| (i % 251) as u8).collect()
    }

    /// Split `data` into consecutive parts of at most `part_size` bytes,
    /// numbered from 1
    pub fn split_parts(data: &[u8], part_size: usize) -> Vec<(u32, Vec<u8>)> {
        assert!(part_size > 0, "part size must be positive");
        data.chunks(part_size)
            .enumerate()
            .map(|(i, chunk)| (i as u32 + 1, chunk.to_vec()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_parts_numbering() {
        let data = TestDataGenerator::patterned_bytes(10);
        let parts = TestDataGenerator::split_parts(&data, 4);

        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].0, 1);
        assert_eq!(parts[2].0, 3);
        assert_eq!(parts[2].1.len(), 2);
    }

    #[test]
    fn test_random_bytes_size() {
        assert_eq!(TestDataGenerator::random_bytes(1024).len(), 1024);
    }
}
