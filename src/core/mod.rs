pub mod error;
pub mod lock;
pub mod logging;
pub mod process;

pub use error::{
    AppError, CaptureError, ResolveError, SettingsError, SolarError, SupervisorError,
    ToolError,
};
pub use lock::{lock_mutex, lock_read, lock_write};
pub use logging::{ComponentLogger, LogContext};
pub use process::{AbortFlag, ToolOutput, run_tool};
