pub mod bytecode;
pub mod constants;
mod cpu;
mod error;
mod keypad;
mod timer;
mod vm;

pub use self::vm::Hz;

/// Version of the implementation, as reported by the CLI.
pub const IMPL_VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod prelude {
    pub use super::{
        error::{Chip8Error, Chip8Result},
        keypad::{InvalidKeyCode, KeyCode, Keypad},
        timer::Timers,
        vm::{Chip8Conf, Chip8Vm, Flow},
    };
}
