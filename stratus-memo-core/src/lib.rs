pub mod memo;

pub use memo::{MemoKey, MemoStore, MemoValue, Side};
