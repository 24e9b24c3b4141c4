pub mod session;
pub mod tools;
