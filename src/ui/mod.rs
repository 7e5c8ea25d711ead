pub mod terminal;
pub mod web;

pub use terminal::{render_qr, spinner, spinner_error, spinner_success};
