pub mod state;
pub mod ticket;
