/// Core abstractions shared by the load balancer and sticking
pub mod connection;
pub mod features;
pub mod session;

use std::fmt;
use std::str::FromStr;

use crate::error::AnclaError;

/// Position in the primary's write-ahead log
///
/// Written and parsed in the `HI/LO` hexadecimal form databases report
/// (`16/B374D848`). Locations are totally ordered, so a replica has caught up
/// with a write once its replayed location is greater than or equal to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WriteLocation(u64);

impl WriteLocation {
    pub fn new(position: u64) -> Self {
        Self(position)
    }

    pub fn position(&self) -> u64 {
        self.0
    }

    /// Number of bytes between this location and an earlier one
    pub fn bytes_since(&self, earlier: WriteLocation) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for WriteLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}/{:X}", self.0 >> 32, self.0 & 0xFFFF_FFFF)
    }
}

impl FromStr for WriteLocation {
    type Err = AnclaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AnclaError::InvalidWriteLocation(s.to_string());

        let (hi, lo) = s.trim().split_once('/').ok_or_else(invalid)?;
        let hi = u32::from_str_radix(hi, 16).map_err(|_| invalid())?;
        let lo = u32::from_str_radix(lo, 16).map_err(|_| invalid())?;

        Ok(Self((u64::from(hi) << 32) | u64::from(lo)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_write_location() {
        let location: WriteLocation = "16/B374D848".parse().unwrap();
        assert_eq!(location.position(), (0x16 << 32) | 0xB374_D848);
        assert_eq!(location.to_string(), "16/B374D848");

        let zero: WriteLocation = "0/0".parse().unwrap();
        assert_eq!(zero, WriteLocation::new(0));
    }

    #[test]
    fn test_invalid_write_locations() {
        for input in ["", "16", "16/", "/B374D848", "G/1", "1/2/3", "100000000/0"] {
            let result = input.parse::<WriteLocation>();
            assert!(
                matches!(result, Err(AnclaError::InvalidWriteLocation(_))),
                "{input:?} should not parse"
            );
        }
    }

    #[test]
    fn test_write_locations_are_ordered_across_segments() {
        let earlier: WriteLocation = "0/FFFFFFFF".parse().unwrap();
        let later: WriteLocation = "1/0".parse().unwrap();

        assert!(earlier < later);
        assert_eq!(later.bytes_since(earlier), 1);
        assert_eq!(earlier.bytes_since(later), 0);
    }
}
