pub mod client;
pub mod config;
pub mod domains;
pub mod error;
pub mod factories;
pub mod index;
pub mod interfaces;
pub mod providers;
pub mod services;
pub mod validator;

pub use crate::client::TableTalk;
pub use crate::config::Config;
pub use crate::error::{Result, TableTalkError};
pub use crate::services::assistant::MutationOutcome;
pub use crate::services::chatbot::QueryOutcome;
pub use crate::validator::{OperationTier, SqlValidator, ValidationVerdict};
