pub mod blacklist;
pub mod general;

pub use blacklist::blacklist;
pub use general::{help, ping};
