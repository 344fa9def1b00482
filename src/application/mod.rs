//! Request pipeline: routes, lifecycle, commands and their collaborators.

pub mod auth;
pub mod bus;
pub mod commands;
pub mod context;
pub mod enums;
pub mod error;
pub mod events;
pub mod hooks;
pub mod manager;
pub mod pagination;
pub mod repos;
pub mod routes;
pub mod search;
pub mod service;
