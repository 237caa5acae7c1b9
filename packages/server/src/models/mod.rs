pub mod package;
pub mod scanner;
pub mod shared;
