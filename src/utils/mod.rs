pub mod text;
pub mod time;

pub use text::symbol_file_slug;
pub use time::{format_timestamp, local_now};
