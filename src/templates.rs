//! Embedded C source templates used by the Source Rewriter's header/wrapper
//! prepend pass and by the Controller Facade's startup compilation.

pub const HELPERS_H: &str = include_str!("../templates/helpers.h");
pub const WRAPPER_C: &str = include_str!("../templates/wrapper.c");
pub const PIVOT_C: &str = include_str!("../templates/pivot.c");
pub const STARTUP_C: &str = include_str!("../templates/startup.c");
