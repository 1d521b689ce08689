use std::collections::VecDeque;
use std::net::Ipv4Addr;
use testbed_stitch_schemas::settings::AddressRange;
use crate::error::StitchError;

/// Addresses handed out to FABRIC interfaces, front to back, each at most once.
#[derive(Debug, Clone)]
pub struct AddressPool {
    range: AddressRange,
    available: VecDeque<Ipv4Addr>,
}

impl AddressPool {
    pub fn from_range(range: &AddressRange) -> Self {
        let available = if range.is_empty() {
            VecDeque::new()
        } else {
            (u32::from(range.start)..=u32::from(range.end))
                .map(Ipv4Addr::from)
                .collect()
        };
        Self {
            range: *range,
            available,
        }
    }

    pub fn pop(&mut self) -> Result<Ipv4Addr, StitchError> {
        self.available
            .pop_front()
            .ok_or_else(|| StitchError::AddressPoolExhausted { range: self.range.to_string() })
    }

    pub fn remaining(&self) -> usize {
        self.available.len()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use super::*;

    #[test]
    fn test_pop_in_order() {
        let mut pool = AddressPool::from_range(&AddressRange::new(
            Ipv4Addr::new(192, 168, 100, 200),
            Ipv4Addr::new(192, 168, 100, 250),
        ));
        assert_eq!(pool.remaining(), 51);
        assert_eq!(pool.pop().unwrap(), Ipv4Addr::new(192, 168, 100, 200));
        assert_eq!(pool.pop().unwrap(), Ipv4Addr::new(192, 168, 100, 201));
        assert_eq!(pool.remaining(), 49);
    }

    #[test]
    fn test_exhaustion_is_an_error() {
        let mut pool = AddressPool::from_range(&AddressRange::new(
            Ipv4Addr::new(10, 0, 0, 254),
            Ipv4Addr::new(10, 0, 1, 1),
        ));
        let mut seen = HashSet::new();
        for _ in 0..4 {
            assert!(seen.insert(pool.pop().unwrap()));
        }
        assert!(seen.contains(&Ipv4Addr::new(10, 0, 1, 0)));
        assert!(matches!(pool.pop(), Err(StitchError::AddressPoolExhausted { .. })));
        assert!(matches!(pool.pop(), Err(StitchError::AddressPoolExhausted { .. })));
    }

    #[test]
    fn test_reversed_range_is_empty() {
        let mut pool = AddressPool::from_range(&AddressRange::new(
            Ipv4Addr::new(10, 0, 0, 9),
            Ipv4Addr::new(10, 0, 0, 1),
        ));
        assert_eq!(pool.remaining(), 0);
        assert!(pool.pop().is_err());
    }
}
