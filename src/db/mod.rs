pub mod models;
pub mod queries;
pub mod quota;
