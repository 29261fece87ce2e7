pub mod bank_api;
