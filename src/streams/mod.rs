pub mod buffer;
pub mod error;
pub mod options;
pub mod progress;
pub mod push;
pub mod reader;
pub mod signal;
pub mod source;

// Re-export main types
pub use buffer::*;
pub use error::*;
pub use options::*;
pub use progress::*;
pub use push::*;
pub use reader::*;
pub use signal::*;
pub use source::*;
