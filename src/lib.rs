// Library exports for rotalog, an append-only rotating file writer

pub mod clock;
pub mod config;
pub mod error;
pub mod meta;
pub mod storage;
pub mod writer;

pub use config::{Options, WriterConfig};
pub use error::{Result, RotalogError};
pub use writer::{AsyncRotatingWriter, RotateTrigger, RotatingWriter};
