mod frontend;
mod overrides;
mod parser;
mod sample;

pub use frontend::YamlFrontend;
pub use overrides::{parse_overrides, parse_overrides_file};
pub use sample::render_sample;
