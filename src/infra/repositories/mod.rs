pub mod sqlite_product_repo;
pub mod sqlite_user_repo;
pub mod sqlite_slot_store;
pub mod sqlite_lease_repo;
pub mod sqlite_job_repo;

pub mod postgres_product_repo;
pub mod postgres_user_repo;
pub mod postgres_slot_store;
pub mod postgres_lease_repo;
pub mod postgres_job_repo;
