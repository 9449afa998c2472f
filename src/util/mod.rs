pub mod id;
pub mod alloc;
pub mod fixed;
pub mod test;
