pub mod health_handlers;
pub mod qrcode_handlers;
