pub mod domains;
pub mod process;
pub mod sudo;
