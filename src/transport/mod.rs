// MIT License - Copyright (c) 2026 Peter Wright
// Byte-stream plumbing between the socket and the session

pub mod direct;
pub mod framer;

pub use framer::{Framer, FramerOutput};
