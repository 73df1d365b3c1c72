#![allow(dead_code)]
#![allow(clippy::unwrap_used)]

pub mod scripted;
pub mod socket_guard;
