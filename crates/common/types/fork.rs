use std::fmt;

/// Named rule sets a transaction can be replayed under. `Mainnet` selects the
/// rules that were active at the substate's own block number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HardFork {
    Mainnet,
    Frontier,
    Homestead,
    TangerineWhistle,
    SpuriousDragon,
    Byzantium,
    Petersburg,
    Istanbul,
}

impl HardFork {
    /// Maps the CLI fork selector (the mainnet activation block of the fork,
    /// 0 for mainnet rules) to a rule set.
    pub fn from_fork_block(block: u64) -> Option<Self> {
        match block {
            0 => Some(HardFork::Mainnet),
            1 => Some(HardFork::Frontier),
            1_150_000 => Some(HardFork::Homestead),
            2_463_000 => Some(HardFork::TangerineWhistle),
            2_675_000 => Some(HardFork::SpuriousDragon),
            4_370_000 => Some(HardFork::Byzantium),
            7_280_000 => Some(HardFork::Petersburg),
            9_069_000 => Some(HardFork::Istanbul),
            _ => None,
        }
    }

    /// The mainnet rule set active at `block`.
    pub fn mainnet_rules_at(block: u64) -> Self {
        match block {
            0..=1_149_999 => HardFork::Frontier,
            1_150_000..=2_462_999 => HardFork::Homestead,
            2_463_000..=2_674_999 => HardFork::TangerineWhistle,
            2_675_000..=4_369_999 => HardFork::SpuriousDragon,
            4_370_000..=7_279_999 => HardFork::Byzantium,
            7_280_000..=9_068_999 => HardFork::Petersburg,
            _ => HardFork::Istanbul,
        }
    }

}

impl fmt::Display for HardFork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HardFork::Mainnet => "Mainnet",
            HardFork::Frontier => "Frontier",
            HardFork::Homestead => "Homestead",
            HardFork::TangerineWhistle => "Tangerine Whistle",
            HardFork::SpuriousDragon => "Spurious Dragon",
            HardFork::Byzantium => "Byzantium",
            HardFork::Petersburg => "Constantinople/Petersburg",
            HardFork::Istanbul => "Istanbul",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fork_selector_blocks_resolve() {
        assert_eq!(HardFork::from_fork_block(0), Some(HardFork::Mainnet));
        assert_eq!(HardFork::from_fork_block(1), Some(HardFork::Frontier));
        assert_eq!(HardFork::from_fork_block(4_370_000), Some(HardFork::Byzantium));
        assert_eq!(HardFork::from_fork_block(42), None);
    }

    #[test]
    fn mainnet_schedule_boundaries() {
        assert_eq!(HardFork::mainnet_rules_at(0), HardFork::Frontier);
        assert_eq!(HardFork::mainnet_rules_at(1_149_999), HardFork::Frontier);
        assert_eq!(HardFork::mainnet_rules_at(1_150_000), HardFork::Homestead);
        assert_eq!(HardFork::mainnet_rules_at(4_370_000), HardFork::Byzantium);
        assert_eq!(HardFork::mainnet_rules_at(9_069_000), HardFork::Istanbul);
    }
}
