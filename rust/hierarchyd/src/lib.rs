//! Academic hierarchy management core: Department -> Level -> Class with
//! role-scoped browsing, bound create/edit forms and a SQLite reference
//! gateway, served to a host over a JSON-lines sidecar protocol.

pub mod cascade;
pub mod config;
pub mod db;
pub mod error;
pub mod form;
pub mod gateway;
pub mod ipc;
pub mod labels;
pub mod model;
pub mod path;
pub mod projection;
pub mod scope;
pub mod screen;
pub mod store;
