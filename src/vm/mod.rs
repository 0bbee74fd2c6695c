pub mod frame;
pub mod opcode;
pub mod vm;
