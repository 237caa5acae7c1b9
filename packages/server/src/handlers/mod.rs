pub mod package;
pub mod scanner;
