//! Result and errors.
use std::fmt::{self, Display, Formatter};
use std::io;

pub type Chip8Result<T> = std::result::Result<T, Chip8Error>;

#[derive(Debug)]
pub enum Chip8Error {
    /// A `00EE` return was executed with no return address on the call
    /// stack, meaning the program's calls and returns are unbalanced.
    EmptyStack {
        /// Program counter just after the offending instruction.
        pc: u16,
    },
    Io(io::Error),
    Fmt(fmt::Error),
}

impl Display for Chip8Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyStack { pc } => {
                write!(f, "return with an empty call stack at 0x{:04X}", pc)
            }
            Self::Io(err) => write!(f, "{}", err),
            Self::Fmt(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for Chip8Error {}

impl From<io::Error> for Chip8Error {
    fn from(err: io::Error) -> Self {
        Chip8Error::Io(err)
    }
}

impl From<fmt::Error> for Chip8Error {
    fn from(err: fmt::Error) -> Self {
        Chip8Error::Fmt(err)
    }
}
