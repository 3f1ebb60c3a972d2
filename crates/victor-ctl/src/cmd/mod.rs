pub mod http;
pub mod pairing;
