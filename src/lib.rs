pub mod booking;
pub mod captcha;
pub mod config;
pub mod driver;
pub mod openai_client;
pub mod page;
pub mod retry;
pub mod sanitize;
