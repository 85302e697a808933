pub mod block;
pub mod request;
pub mod theme;
