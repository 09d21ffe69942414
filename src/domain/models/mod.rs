pub mod job;
pub mod member;
pub mod payment;
pub mod product;
pub mod slot;
pub mod user;
pub mod waiting_list;
