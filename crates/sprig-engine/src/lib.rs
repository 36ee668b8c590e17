//! Sprig engine: a lazy WebAssembly function compiler and threaded-code
//! executor.
//!
//! Modules are loaded into a [`Runtime`]. A function is compiled the first
//! time it is called, into a sequence of operation words and immediates in
//! the runtime's code pages. Execution walks that sequence with a small
//! register machine: one integer register, one float register and a value
//! stack kept in a private [`sprig_memory::SegmentedMemory`] heap. Guest
//! linear memory is a second segmented memory grown in 64 KiB pages.
//!
//! ```
//! use sprig_engine::{EngineConfig, Environment, Module, Runtime, Value};
//! # fn wat() -> Vec<u8> {
//! #     // (func (export "answer") (result i32) i32.const 42)
//! #     vec![
//! #         0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00, 0x01, 0x05, 0x01, 0x60, 0x00, 0x01,
//! #         0x7f, 0x03, 0x02, 0x01, 0x00, 0x07, 0x0a, 0x01, 0x06, 0x61, 0x6e, 0x73, 0x77, 0x65,
//! #         0x72, 0x00, 0x00, 0x0a, 0x06, 0x01, 0x04, 0x00, 0x41, 0x2a, 0x0b,
//! #     ]
//! # }
//! let env = Environment::new();
//! let mut runtime = Runtime::new(&env, EngineConfig::default()).unwrap();
//! let module = Module::parse("answer", wat()).unwrap();
//! runtime.load(std::rc::Rc::new(module)).unwrap();
//! let answer = runtime.find_function("answer").unwrap();
//! assert_eq!(runtime.call(answer, &[]).unwrap(), vec![Value::I32(42)]);
//! ```

mod backtrace;
mod code;
mod compile;
mod config;
mod environment;
mod error;
mod exec;
mod function;
mod host;
mod runtime;

pub use backtrace::{Backtrace, BacktraceFrame};
pub use config::EngineConfig;
pub use environment::Environment;
pub use error::{CompileError, CompileResult, ConfigError, EngineResult, Error, LinkError, RuntimeError, Trap};
pub use function::{FuncId, FunctionInfo, HostHandler, ModuleId};
pub use host::HostContext;
pub use runtime::Runtime;

pub use sprig_module::Module;
pub use sprig_types::{FuncType, Value, ValueType};
