pub mod channel;
pub mod web;
