pub mod resolution;
