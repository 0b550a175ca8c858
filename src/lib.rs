#![allow(non_snake_case)]

mod autoplay;
mod engine;
mod error;
mod evaluator;
mod game;
mod midi_importer;
mod model;
mod timeline;
mod transport;
mod util;

#[cfg(test)]
mod test_support;

pub use autoplay::*;
pub use engine::*;
pub use engine::keep_awake::KeepAwake;
pub use engine::log_output::LogOutput;
pub use error::*;
pub use evaluator::*;
pub use game::*;
pub use midi_importer::*;
pub use model::config::*;
pub use model::settings::*;
pub use model::song::*;
pub use timeline::*;
pub use transport::*;
pub use util::*;
