pub mod allocator;
pub mod payment_confirmation;
pub mod promoter;
