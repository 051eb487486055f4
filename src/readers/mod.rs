mod multiplexer;

pub use multiplexer::{EventStream, MergeExit, MergeSummary, SubscriptionMultiplexer};
