use serde::{Deserialize, Serialize};

use crate::ledger::state::DEFAULT_HAMT_BIT_WIDTH;
use crate::ledger::LedgerError;

/// Hamt bit widths accepted by the underlying maps
const HAMT_BIT_WIDTH_RANGE: std::ops::RangeInclusive<u32> = 1..=8;

/// Creation-time description of a ledger
///
/// Name, symbol and decimals are descriptive only and never change after creation. The Hamt bit
/// width tunes the balance and allowance maps.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct LedgerConfig {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub hamt_bit_width: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            symbol: String::new(),
            decimals: 0,
            hamt_bit_width: DEFAULT_HAMT_BIT_WIDTH,
        }
    }
}

impl LedgerConfig {
    pub fn new(name: impl Into<String>, symbol: impl Into<String>, decimals: u8) -> Self {
        Self { name: name.into(), symbol: symbol.into(), decimals, ..Default::default() }
    }

    pub fn with_hamt_bit_width(mut self, hamt_bit_width: u32) -> Self {
        self.hamt_bit_width = hamt_bit_width;
        self
    }

    pub fn validate(&self) -> Result<(), LedgerError> {
        if !HAMT_BIT_WIDTH_RANGE.contains(&self.hamt_bit_width) {
            return Err(LedgerError::InvalidInitialization {
                reason: format!(
                    "hamt bit width {} outside of {:?}",
                    self.hamt_bit_width, HAMT_BIT_WIDTH_RANGE
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::LedgerConfig;
    use crate::ledger::state::DEFAULT_HAMT_BIT_WIDTH;
    use crate::ledger::LedgerError;

    #[test]
    fn it_builds_configs() {
        let config = LedgerConfig::new("Fun Token", "FUN", 0);
        assert_eq!(config.name, "Fun Token");
        assert_eq!(config.symbol, "FUN");
        assert_eq!(config.decimals, 0);
        assert_eq!(config.hamt_bit_width, DEFAULT_HAMT_BIT_WIDTH);
        config.validate().unwrap();

        let config = config.with_hamt_bit_width(8);
        assert_eq!(config.hamt_bit_width, 8);
        config.validate().unwrap();
    }

    #[test]
    fn it_rejects_out_of_range_bit_widths() {
        for width in [0, 9, 32] {
            let err = LedgerConfig::default().with_hamt_bit_width(width).validate().unwrap_err();
            assert!(matches!(err, LedgerError::InvalidInitialization { .. }), "{err:?}");
        }
    }
}
