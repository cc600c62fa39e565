pub mod context;
pub mod engine;
pub mod fetcher;
pub mod groq;
pub mod prompts;
pub mod remote;
pub mod request;
pub mod state;
pub mod utils;
