pub mod callback;
pub mod scheduler;

pub use callback::{ParserCallback, RenderCallback, SessionCallback};
pub use scheduler::{RenderScheduler, RenderState};
