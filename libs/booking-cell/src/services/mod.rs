pub mod transactor;
