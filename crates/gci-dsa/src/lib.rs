#![no_std]
extern crate alloc;

pub mod window;

pub use window::HistoryWindow;
