mod command;
mod encoder;
mod frame;
mod parser;

pub use command::Command;
pub use encoder::Encoder;
pub use frame::Frame;
pub use parser::Parser;
