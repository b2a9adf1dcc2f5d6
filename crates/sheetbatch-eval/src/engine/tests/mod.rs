mod common;
mod cycle_detection;
mod named_operations;
mod range_memoization;
