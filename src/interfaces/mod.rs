pub mod kvpath;
pub mod mqtt;
