//! Sun-window scheduling: when capture should run, and the loop that
//! enforces it.

pub mod policy;
pub mod scheduler;
pub mod solar;

pub use policy::{
    CaptureWindowDecision, DecisionReason, SchedulePolicy, SolarCalculator, SunEvent,
    SunTimesSource, WindowMode, evaluate, evaluate_with, next_window, next_window_with,
};
pub use scheduler::{CapturePlan, CaptureScheduler, ShutdownHook, SystemShutdown, TickOutcome};
pub use solar::{SunTimes, sun_times};
