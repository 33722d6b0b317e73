//! Services separating file and encoding concerns from processing logic

pub mod io;

pub use io::ImageIOService;
