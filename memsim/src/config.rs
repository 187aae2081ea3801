use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::memory::WORD_BYTES;

pub const DEFAULT_PAGE_SIZE: u32 = 4 * 1024;
pub const DEFAULT_PAGE_COUNT: u32 = 1024 * 1024;
/// cost of a request that misses every level
pub const DEFAULT_MISS_CYCLES: u32 = 100;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("hierarchy needs at least one cache level")]
    NoLevels,
    #[error("level {level}: line size {line_size} is not a positive multiple of 4")]
    LineSize { level: usize, line_size: u32 },
    #[error("level {level}: capacity {capacity} is not a positive multiple of line size {line_size}")]
    Capacity {
        level: usize,
        capacity: u32,
        line_size: u32,
    },
    #[error("level {level}: address space of {space:#x} bytes is not a whole number of {line_size}-byte lines")]
    LineSpan {
        level: usize,
        line_size: u32,
        space: u64,
    },
    #[error("page size {0} is not a positive multiple of 4")]
    PageSize(u32),
    #[error("page count must be positive")]
    PageCount,
    #[error("address space of {0:#x} bytes exceeds 32-bit addressing")]
    AddressSpace(u64),
    #[error("miss cost must be at least one cycle")]
    MissCycles,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MemoryConfig {
    pub page_size: u32,
    pub page_count: u32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            page_count: DEFAULT_PAGE_COUNT,
        }
    }
}

impl MemoryConfig {
    pub fn capacity(&self) -> u64 {
        self.page_size as u64 * self.page_count as u64
    }
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size < WORD_BYTES || self.page_size % WORD_BYTES != 0 {
            return Err(ConfigError::PageSize(self.page_size));
        }
        if self.page_count == 0 {
            return Err(ConfigError::PageCount);
        }
        if self.capacity() > 1u64 << 32 {
            return Err(ConfigError::AddressSpace(self.capacity()));
        }
        Ok(())
    }
}

/// One direct-mapped level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LevelConfig {
    /// bytes of data held by the level
    pub capacity: u32,
    pub line_size: u32,
    /// extra cycles a hit at this level costs on top of the base cycle
    pub latency: u32,
}

impl LevelConfig {
    pub const fn new(capacity: u32, line_size: u32, latency: u32) -> Self {
        Self {
            capacity,
            line_size,
            latency,
        }
    }
    pub fn num_lines(&self) -> u32 {
        self.capacity / self.line_size
    }
    pub fn hit_cycles(&self) -> u32 {
        self.latency.saturating_add(1)
    }
    /// `level` is only used for error reporting.
    pub fn validate(&self, level: usize, space: u64) -> Result<(), ConfigError> {
        let line_size = self.line_size;
        if line_size < WORD_BYTES || line_size % WORD_BYTES != 0 {
            return Err(ConfigError::LineSize { level, line_size });
        }
        if self.capacity == 0 || self.capacity % line_size != 0 {
            return Err(ConfigError::Capacity {
                level,
                capacity: self.capacity,
                line_size,
            });
        }
        if space % line_size as u64 != 0 {
            return Err(ConfigError::LineSpan {
                level,
                line_size,
                space,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimConfig {
    pub memory: MemoryConfig,
    /// outermost (closest to the requester) first
    pub levels: Vec<LevelConfig>,
    pub miss_cycles: u32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            memory: MemoryConfig::default(),
            levels: vec![LevelConfig::new(1024, 64, 1), LevelConfig::new(2048, 64, 3)],
            miss_cycles: DEFAULT_MISS_CYCLES,
        }
    }
}

impl SimConfig {
    pub fn deser(file: impl std::io::Read) -> Result<Self> {
        let config: Self = serde_json::from_reader(file)?;
        config.validate()?;
        Ok(config)
    }
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.memory.validate()?;
        validate_levels(&self.levels, self.miss_cycles, self.memory.capacity())
    }
    /// longest a single request can take before `ready` asserts
    pub fn worst_case_cycles(&self) -> u32 {
        worst_case_cycles(&self.levels, self.miss_cycles)
    }
}

pub(crate) fn validate_levels(
    levels: &[LevelConfig],
    miss_cycles: u32,
    space: u64,
) -> Result<(), ConfigError> {
    if levels.is_empty() {
        return Err(ConfigError::NoLevels);
    }
    if miss_cycles == 0 {
        return Err(ConfigError::MissCycles);
    }
    for (level, l) in levels.iter().enumerate() {
        l.validate(level, space)?;
    }
    Ok(())
}

pub(crate) fn worst_case_cycles(levels: &[LevelConfig], miss_cycles: u32) -> u32 {
    levels
        .iter()
        .map(LevelConfig::hit_cycles)
        .fold(miss_cycles, u32::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = SimConfig::default();
        assert_eq!(1u64 << 32, c.memory.capacity());
        assert_eq!(16, c.levels[0].num_lines());
        assert_eq!(32, c.levels[1].num_lines());
        assert_eq!(Ok(()), c.validate());
        assert_eq!(DEFAULT_MISS_CYCLES, c.worst_case_cycles());
    }

    #[test]
    fn test_deser_partial() {
        let json = r#"{ "levels": [ { "capacity": 256, "line_size": 16, "latency": 2 } ] }"#;
        let c = SimConfig::deser(json.as_bytes()).unwrap();
        assert_eq!(vec![LevelConfig::new(256, 16, 2)], c.levels);
        assert_eq!(MemoryConfig::default(), c.memory);
        assert_eq!(DEFAULT_MISS_CYCLES, c.miss_cycles);
    }

    #[test]
    fn test_deser_rejects_unknown_field() {
        let json = r#"{ "associativity": 4 }"#;
        assert!(SimConfig::deser(json.as_bytes()).is_err());
    }

    #[test]
    fn test_deser_validates() {
        let json = r#"{ "levels": [] }"#;
        let e = SimConfig::deser(json.as_bytes()).unwrap_err();
        assert_eq!(
            Some(&ConfigError::NoLevels),
            e.downcast_ref::<ConfigError>()
        );
    }

    #[test]
    fn test_validate() {
        let mut c = SimConfig::default();
        c.levels[1].line_size = 6;
        assert_eq!(
            Err(ConfigError::LineSize {
                level: 1,
                line_size: 6
            }),
            c.validate()
        );
        let mut c = SimConfig::default();
        c.levels[0].capacity = 1000;
        assert!(matches!(
            c.validate(),
            Err(ConfigError::Capacity { level: 0, .. })
        ));
        let mut c = SimConfig::default();
        c.memory.page_count = 1 << 21;
        assert_eq!(Err(ConfigError::AddressSpace(1 << 33)), c.validate());
        let mut c = SimConfig::default();
        c.memory = MemoryConfig {
            page_size: 100,
            page_count: 1,
        };
        assert!(matches!(
            c.validate(),
            Err(ConfigError::LineSpan { level: 0, .. })
        ));
        let c = SimConfig {
            miss_cycles: 0,
            ..Default::default()
        };
        assert_eq!(Err(ConfigError::MissCycles), c.validate());
    }

    #[test]
    fn test_worst_case() {
        let c = SimConfig {
            levels: vec![LevelConfig::new(64, 16, 200)],
            miss_cycles: 10,
            ..Default::default()
        };
        assert_eq!(201, c.worst_case_cycles());
    }
}
