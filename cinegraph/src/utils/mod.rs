pub mod batch;
pub mod id;
pub mod key;
