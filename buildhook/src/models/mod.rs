mod build;
mod event;
mod record;
mod run;

pub use self::build::*;
pub use self::event::*;
pub use self::record::*;
pub use self::run::*;
