mod hooks;
mod spec;
mod training;

pub use hooks::{Event, Hook};
pub use spec::KidSpec;
pub use training::{Kid, KidState};
