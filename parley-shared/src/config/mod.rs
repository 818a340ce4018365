pub mod server;

pub use server::Config;
