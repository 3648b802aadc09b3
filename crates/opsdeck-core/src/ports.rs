//! Worker port encoding.
//!
//! Ports of sharded workers follow `<prefix><roleIndex><slotId>`, with the
//! role index as a single digit and the slot id zero-padded to two digits.
//! Prefix `5`, role `1`, slot `7` gives port `5107`. Call sites go through
//! [`PortScheme`] only, so the encoding can change in one place.

use serde::{Deserialize, Serialize};

use crate::types::SlotId;

/// Highest role index the encoding can hold (one decimal digit).
pub const MAX_ROLE_INDEX: usize = 9;

/// Highest slot id the encoding can hold (two decimal digits).
pub const MAX_SLOT_ID: SlotId = 99;

/// Deterministic port derivation for one sharded project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortScheme {
    pub prefix: u16,
}

impl PortScheme {
    pub fn new(prefix: u16) -> Self {
        Self { prefix }
    }

    /// Expected port of the worker with `role_index` in `slot_id`.
    ///
    /// Returns `None` when the index or slot does not fit the encoding or
    /// the result overflows a `u16`.
    pub fn worker_port(&self, role_index: usize, slot_id: SlotId) -> Option<u16> {
        if role_index > MAX_ROLE_INDEX || slot_id > MAX_SLOT_ID {
            return None;
        }
        format!("{}{}{:02}", self.prefix, role_index, slot_id)
            .parse()
            .ok()
    }

    /// The slot's main port is the port of its first role.
    pub fn main_port(&self, slot_id: SlotId) -> Option<u16> {
        self.worker_port(0, slot_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_prefix_role_and_padded_slot() {
        let scheme = PortScheme::new(5);
        assert_eq!(scheme.worker_port(1, 7), Some(5107));
        assert_eq!(scheme.worker_port(4, 20), Some(5420));
        assert_eq!(scheme.main_port(12), Some(5012));
    }

    #[test]
    fn rejects_values_outside_the_encoding() {
        let scheme = PortScheme::new(5);
        assert_eq!(scheme.worker_port(10, 1), None);
        assert_eq!(scheme.worker_port(1, 100), None);
    }

    #[test]
    fn rejects_overflowing_ports() {
        // "7" + "0" + "01" = 7001 fits, "70" + "9" + "99" = 70999 does not.
        assert_eq!(PortScheme::new(7).worker_port(0, 1), Some(7001));
        assert_eq!(PortScheme::new(70).worker_port(9, 99), None);
    }
}
