pub mod error;
pub mod survey;
pub mod trace;
pub mod variant;
pub mod versions;

pub use error::{Error, Result};
pub use trace::{Stage, TraceRecord};
pub use variant::Variant;
