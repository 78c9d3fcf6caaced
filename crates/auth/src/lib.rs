pub mod admin;
pub mod sigv4;
pub mod tokens;
pub mod webhook;

pub use admin::*;
pub use sigv4::*;
pub use tokens::*;
pub use webhook::*;
