pub mod auth;
pub mod calendar;
pub mod docs;
pub mod health;
pub mod notifications;
pub mod reminders;
pub mod stakeholders;
pub mod tasks;
pub mod users;
