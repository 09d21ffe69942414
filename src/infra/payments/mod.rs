pub mod http_payment_provider;
