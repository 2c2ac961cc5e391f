pub mod assistant;
pub mod chatbot;
