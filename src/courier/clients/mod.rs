// src/courier/clients/mod.rs

pub mod http_pool;
pub mod openai_assistant;
pub mod sendgrid;
pub mod twilio;

pub use openai_assistant::OpenAiAssistantClient;
pub use sendgrid::SendGridClient;
pub use twilio::TwilioClient;
