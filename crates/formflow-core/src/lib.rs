pub mod config;
pub mod error;
pub mod event;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use error::{FormError, Result};
pub use event::{EventBus, EventStream, NullSink, TracingSink};
pub use traits::{Dispatcher, EventSink};
pub use types::*;
