pub mod action_reader;
pub mod payout_writer;
