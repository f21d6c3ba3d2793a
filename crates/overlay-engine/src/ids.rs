//! Fragment id allocation

/// Hands out fragment ids, scoped to one fragmentation run.
///
/// Ids are never reused by the same generator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FragmentIdGenerator {
    next: u64,
}

impl FragmentIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start counting from `first`
    pub fn starting_at(first: u64) -> Self {
        Self { next: first }
    }

    pub fn next_id(&mut self) -> u64 {
        let id = self.next;
        self.next += 1;
        id
    }

    /// Number of ids handed out when started from zero
    pub fn peek(&self) -> u64 {
        self.next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_sequential_and_unique() {
        let mut ids = FragmentIdGenerator::new();
        let issued: Vec<u64> = (0..5).map(|_| ids.next_id()).collect();
        assert_eq!(issued, vec![0, 1, 2, 3, 4]);
        assert_eq!(ids.peek(), 5);
    }

    #[test]
    fn test_starting_at() {
        let mut ids = FragmentIdGenerator::starting_at(100);
        assert_eq!(ids.next_id(), 100);
        assert_eq!(ids.next_id(), 101);
    }
}
