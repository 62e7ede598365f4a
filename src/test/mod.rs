pub mod utils;

mod catalog;
mod submissions;
