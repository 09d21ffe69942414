pub mod health;
pub mod me;
pub mod product;
pub mod slot;
pub mod webhook;
