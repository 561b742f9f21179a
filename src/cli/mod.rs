mod client;
mod status;

pub use client::{Client, ClientError};
pub use status::{print_cycle_report, print_members, print_remotes, print_status};
