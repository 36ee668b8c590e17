//! Engine configuration.

use serde::{Deserialize, Serialize};
use sprig_memory::MemoryConfig;

use crate::error::ConfigError;

/// Limits and sizes for one [`Runtime`](crate::Runtime).
///
/// Every field has a default, so a JSON document only needs the values it
/// changes:
///
/// ```
/// use sprig_engine::EngineConfig;
///
/// let config = EngineConfig::from_json(r#"{ "max_call_depth": 64 }"#).unwrap();
/// assert_eq!(config.max_call_depth, 64);
/// assert_eq!(config.stack_size, EngineConfig::default().stack_size);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Bytes of private heap reserved for the value stack.
    pub stack_size: u32,
    /// Segment size of the private heap.
    pub heap_segment_size: usize,
    /// Growth ceiling of the private heap in bytes.
    pub heap_max_size: u64,
    /// Segment size of guest linear memory.
    pub memory_segment_size: usize,
    /// Cap on linear memory pages, applied on top of the module's maximum.
    pub max_memory_pages: u32,
    /// Words per code page.
    pub code_page_lines: u32,
    /// Code pages a runtime may hold.
    pub max_code_pages: u32,
    /// Size of a function's constant table in slots.
    pub max_constant_slots: u16,
    /// Slots in one function frame.
    pub max_function_slots: u16,
    /// Entries on the compile-time operand stack.
    pub max_stack_height: u16,
    /// Nested guest calls before a call traps with `StackOverflow`.
    pub max_call_depth: u32,
    /// Frames kept in a trap backtrace.
    pub backtrace_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stack_size: 64 * 1024,
            heap_segment_size: 16 * 1024,
            heap_max_size: 16 * 1024 * 1024,
            memory_segment_size: 16 * 1024,
            max_memory_pages: 65_536,
            code_page_lines: 2048,
            max_code_pages: 1024,
            max_constant_slots: 120,
            max_function_slots: 4000,
            max_stack_height: 2000,
            max_call_depth: 512,
            backtrace_limit: 32,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.heap_config()
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("heap: {e}")))?;
        MemoryConfig::linear(self.memory_segment_size, 0, self.max_memory_pages)
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("linear memory: {e}")))?;

        if self.stack_size < 64 || self.stack_size % 8 != 0 {
            return Err(ConfigError::Invalid(format!(
                "stack_size {} must be a multiple of 8 and at least 64",
                self.stack_size
            )));
        }
        if u64::from(self.stack_size) > self.heap_max_size {
            return Err(ConfigError::Invalid(format!(
                "stack_size {} does not fit heap_max_size {}",
                self.stack_size, self.heap_max_size
            )));
        }
        if self.max_memory_pages > 65_536 {
            return Err(ConfigError::Invalid(format!(
                "max_memory_pages {} exceeds the 32-bit address space",
                self.max_memory_pages
            )));
        }
        // An operation plus its widest immediate list must fit one page.
        if self.code_page_lines < 32 {
            return Err(ConfigError::Invalid(format!(
                "code_page_lines {} is below 32",
                self.code_page_lines
            )));
        }
        if self.max_code_pages == 0 {
            return Err(ConfigError::Invalid("max_code_pages must be positive".into()));
        }
        if self.max_function_slots < 16 || self.max_function_slots == u16::MAX {
            return Err(ConfigError::Invalid(format!(
                "max_function_slots {} out of range",
                self.max_function_slots
            )));
        }
        if self.max_constant_slots >= self.max_function_slots {
            return Err(ConfigError::Invalid(format!(
                "max_constant_slots {} must be below max_function_slots {}",
                self.max_constant_slots, self.max_function_slots
            )));
        }
        if self.max_stack_height == 0 || self.max_call_depth == 0 {
            return Err(ConfigError::Invalid(
                "max_stack_height and max_call_depth must be positive".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn heap_config(&self) -> MemoryConfig {
        MemoryConfig {
            segment_size: self.heap_segment_size,
            initial_size: 0,
            max_size: self.heap_max_size,
        }
    }

    /// Slots the value stack holds.
    pub(crate) fn stack_slots(&self) -> u32 {
        self.stack_size / 4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_odd_segment_size() {
        let config = EngineConfig {
            memory_segment_size: 3000,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_stack_larger_than_heap() {
        let config = EngineConfig {
            stack_size: 1 << 20,
            heap_max_size: 1 << 16,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn json_round_trip_keeps_overrides() {
        let config = EngineConfig {
            backtrace_limit: 4,
            ..EngineConfig::default()
        };
        let json = config.to_json().unwrap();
        assert_eq!(EngineConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn malformed_json_is_reported() {
        assert!(matches!(
            EngineConfig::from_json("{ stack_size: "),
            Err(ConfigError::Json(_))
        ));
    }
}
