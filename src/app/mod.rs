//! Wiring of the library's pieces into a runnable application.

mod runtime;

pub use runtime::AppContext;
