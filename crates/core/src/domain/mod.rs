pub mod bot;
pub mod credential;
pub mod message;
pub mod notification;
pub mod session;
pub mod user;
