pub mod accumulator;
pub mod byte_queue;
pub mod handoff;
